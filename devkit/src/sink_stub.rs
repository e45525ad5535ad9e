/*!
Sinks de test

- RecordingSink : garde chaque lot reçu pour les assertions
- FailingSink : échoue toujours, compte les tentatives
*/

use async_trait::async_trait;
use beacon_kernel::error::{KernelError, KernelResult};
use beacon_kernel::sink::{Point, Sink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<Vec<Point>>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Point>> {
        self.batches.lock().clone()
    }

    /// Tous les points, dans l'ordre d'écriture
    pub fn points(&self) -> Vec<Point> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn point_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn write(&self, points: &[Point]) -> KernelResult<()> {
        log::debug!("recording batch of {} points", points.len());
        self.batches.lock().push(points.to_vec());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for FailingSink {
    async fn write(&self, points: &[Point]) -> KernelResult<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(KernelError::SinkUnavailable(format!("refused {} points", points.len())))
    }
}

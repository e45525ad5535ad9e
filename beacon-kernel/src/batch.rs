/**
 * BATCHING QUEUE & FLUSHER - Découple l'entrée réseau des écritures en base
 *
 * FONCTIONNEMENT :
 * - N handlers de connexion poussent dans une file mpsc bornée
 * - 1 flusher accumule un lot et l'envoie au Sink quand :
 *   * le lot atteint `max_batch_size` (déclencheur taille)
 *   * le tick périodique tombe et le lot n'est pas vide (déclencheur temps)
 * - File pleine : les producteurs attendent (Block) ou l'observation est jetée (DropNewest)
 * - Erreur du Sink : journalisée, lot abandonné, le pipeline continue
 */

use crate::health::HealthTracker;
use crate::models::Observation;
use crate::sink::{Point, Sink};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Block,
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    pub measurement: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            flush_interval: Duration::from_secs(10),
            queue_capacity: 1024,
            overflow: OverflowPolicy::Block,
            measurement: crate::sink::DEFAULT_MEASUREMENT.to_string(),
        }
    }
}

/// Côté producteur, clonable pour chaque connexion
#[derive(Clone)]
pub struct BatchQueue {
    tx: mpsc::Sender<Observation>,
    overflow: OverflowPolicy,
    health: HealthTracker,
}

impl BatchQueue {
    /// Retourne `false` si l'observation n'a pas été mise en file
    pub async fn push(&self, obs: Observation) -> bool {
        match self.overflow {
            OverflowPolicy::Block => self.tx.send(obs).await.is_ok(),
            OverflowPolicy::DropNewest => match self.tx.try_send(obs) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.health.record_overflow_drop();
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }
}

/// Crée la file et démarre le flusher ; le flusher s'arrête quand tous les
/// `BatchQueue` sont droppés, après un dernier flush
pub fn spawn_flusher(
    config: BatchConfig,
    sink: Arc<dyn Sink>,
    health: HealthTracker,
) -> (BatchQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let queue = BatchQueue {
        tx,
        overflow: config.overflow,
        health: health.clone(),
    };
    let flusher = Flusher {
        batch: Vec::with_capacity(config.max_batch_size),
        config,
        sink,
        health,
    };
    let handle = tokio::spawn(flusher.run(rx));
    (queue, handle)
}

struct Flusher {
    batch: Vec<Observation>,
    config: BatchConfig,
    sink: Arc<dyn Sink>,
    health: HealthTracker,
}

impl Flusher {
    async fn run(mut self, mut rx: mpsc::Receiver<Observation>) {
        let max = self.config.max_batch_size.max(1);
        let period = self.config.flush_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // premier tick immédiat

        info!(
            max_batch = max,
            interval_ms = period.as_millis() as u64,
            "flusher started"
        );

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(obs) => {
                        self.batch.push(obs);
                        if self.batch.len() >= max {
                            self.flush("size").await;
                        }
                    }
                    None => {
                        if !self.batch.is_empty() {
                            self.flush("shutdown").await;
                        }
                        info!("flusher stopped, queue closed");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.flush("interval").await;
                    }
                }
            }
        }
    }

    async fn flush(&mut self, trigger: &'static str) {
        let batch = std::mem::take(&mut self.batch);
        let points: Vec<Point> = batch
            .iter()
            .map(|o| Point::from_observation(&self.config.measurement, o))
            .collect();

        match self.sink.write(&points).await {
            Ok(()) => {
                self.health.record_flushed(points.len());
                debug!(points = points.len(), trigger, "batch flushed");
            }
            Err(e) => {
                self.health.record_sink_failure();
                error!(points = points.len(), trigger, error = %e, "sink write failed, batch dropped");
            }
        }
        self.batch.reserve(self.config.max_batch_size);
    }
}

/**
 * SERVEUR TCP - Une tâche par connexion gateway
 *
 * - lecture ligne par ligne, chaque ligne passe dans le PipelineContext
 * - limite optionnelle de connexions simultanées (Semaphore)
 * - déconnexion ou erreur de lecture : seule la tâche concernée s'arrête
 */

use crate::pipeline::PipelineContext;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Au-delà, la connexion est fermée (ligne jamais terminée)
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Boucle d'accept ; les tâches de connexion appartiennent à ce futur et sont
/// annulées avec lui (libère les clones de la file de batch)
pub async fn serve(listener: TcpListener, ctx: PipelineContext, max_connections: Option<usize>) {
    let limiter = max_connections.map(|n| Arc::new(Semaphore::new(n)));
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, max_connections = ?max_connections, "listening for gateways");
    }

    let mut connections = JoinSet::new();
    loop {
        while connections.try_join_next().is_some() {}

        // le permis est pris avant accept : au-delà de la limite, les clients attendent dans le backlog
        let permit = match &limiter {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(p) => Some(p),
                Err(_) => return,
            },
            None => None,
        };

        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };

        let ctx = ctx.clone();
        connections.spawn(async move {
            handle_connection(stream, peer, ctx).await;
            drop(permit);
        });
    }
}

pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: PipelineContext) {
    let ip = peer.ip();
    info!(%ip, "connected");
    ctx.health.connection_opened();
    ctx.clients.connected(ip);

    if let Err(e) = read_lines(stream, peer, &ctx).await {
        debug!(%ip, error = %e, "connection read error");
    }

    ctx.clients.disconnected(ip);
    ctx.health.connection_closed();
    info!(%ip, "disconnected");
}

async fn read_lines<R>(stream: R, peer: SocketAddr, ctx: &PipelineContext) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let ip = peer.ip();
    let mut reader = BufReader::new(stream);
    let mut conn = ctx.connection_context(ip);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }
        if n == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
            warn!(%ip, "line too long, closing connection");
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        ctx.handle_line(&line, &mut conn, ip).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{spawn_flusher, BatchConfig};
    use crate::clients::ClientTable;
    use crate::health::HealthTracker;
    use crate::identity::{IdentitySets, IdentityValidator};
    use crate::ownership::{OwnershipArbitrator, DEFAULT_STALE_WINDOW};
    use crate::sink::LogSink;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn context() -> PipelineContext {
        let sets = IdentitySets {
            gateways: ["00:C0:B1:00:00:01".to_string()].into_iter().collect(),
            beacons: ["00:C0:B1:AA:BB:CC".to_string()].into_iter().collect(),
            unregistered: Default::default(),
        };
        let health = HealthTracker::new();
        let (queue, _) = spawn_flusher(BatchConfig::default(), Arc::new(LogSink), health.clone());
        PipelineContext {
            validator: Arc::new(IdentityValidator::new(sets)),
            arbitrator: Arc::new(OwnershipArbitrator::new(DEFAULT_STALE_WINDOW)),
            queue,
            health,
            clients: ClientTable::new(),
            prefix: None,
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_read_lines_handles_crlf_and_garbage() {
        let ctx = context();
        let peer: SocketAddr = "10.0.0.5:5000".parse().unwrap();
        let input: &[u8] = b"junk\r\nx,0x00c0b1aabbcc,-70,y,0x00c0b1000001\r\n\xff\xfe\nx,0x00c0b1aabbcc,-71,y,0x00c0b1000001";
        read_lines(input, peer, &ctx).await.unwrap();

        let snap = ctx.health.snapshot();
        assert_eq!(snap.lines_received, 4);
        assert_eq!(snap.malformed_lines, 2);
        assert_eq!(snap.accepted, 2);
        assert_eq!(ctx.arbitrator.owner_of("00:C0:B1:AA:BB:CC").unwrap().last_signal_strength, -71);
    }

    #[tokio::test]
    async fn test_oversized_line_closes() {
        let ctx = context();
        let peer: SocketAddr = "10.0.0.5:5000".parse().unwrap();
        let input = vec![b'a'; MAX_LINE_BYTES + 10];
        read_lines(input.as_slice(), peer, &ctx).await.unwrap();
        assert_eq!(ctx.health.snapshot().lines_received, 0);
    }

    #[tokio::test]
    async fn test_serve_tracks_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = context();
        tokio::spawn(serve(listener, ctx.clone(), Some(4)));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x,0x00c0b1aabbcc,-70,y,0x00c0b1000001\n").await.unwrap();
        wait_for(|| ctx.health.snapshot().accepted == 1).await;
        assert_eq!(ctx.clients.len(), 1);

        drop(client);
        wait_for(|| ctx.clients.is_empty()).await;
        assert_eq!(ctx.health.snapshot().active_connections, 0);
    }

    #[tokio::test]
    async fn test_connection_limit_queues_extra_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = context();
        tokio::spawn(serve(listener, ctx.clone(), Some(1)));

        let first = TcpStream::connect(addr).await.unwrap();
        wait_for(|| ctx.health.snapshot().active_connections == 1).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"x,0x00c0b1aabbcc,-70,y,0x00c0b1000001\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.health.snapshot().accepted, 0);

        drop(first);
        wait_for(|| ctx.health.snapshot().accepted == 1).await;
    }
}

//! TCP accept loop and graceful shutdown.
//!
//! Every accepted client gets its own session task holding a clone of the
//! [`Dispatcher`]. When the shutdown future resolves the server stops
//! accepting, tells idle sessions to close, and waits for in-flight
//! commands to finish before returning. Sessions still running after
//! `shutdown_timeout` are aborted.

use crate::commands::Dispatcher;
use crate::config::ServerConfig;
use crate::connection::{handle_connection, handler::log_accepted, ConnectionStats};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs the accept loop on `listener` until `shutdown` resolves.
///
/// Clients beyond `config.max_connections` are dropped immediately.
pub async fn run<F>(
    listener: TcpListener,
    dispatcher: Dispatcher,
    config: &ServerConfig,
    shutdown: F,
) -> std::io::Result<Arc<ConnectionStats>>
where
    F: Future<Output = ()>,
{
    let stats = Arc::new(ConnectionStats::new());
    let limit = config.max_connections.map(|n| Arc::new(Semaphore::new(n)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sessions = JoinSet::new();

    info!(
        addr = %listener.local_addr()?,
        max_connections = ?config.max_connections,
        "Listening for connections"
    );

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown signal received, draining connections...");
                break;
            }

            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

            result = listener.accept() => {
                let (stream, addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let permit = match &limit {
                    Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!(client = %addr, "Connection limit reached, dropping connection");
                            drop(stream);
                            continue;
                        }
                    },
                    None => None,
                };

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                }

                log_accepted(addr, &stats);
                let session = handle_connection(
                    stream,
                    addr,
                    dispatcher.clone(),
                    Arc::clone(&stats),
                    shutdown_rx.clone(),
                );

                sessions.spawn(async move {
                    session.await;
                    // releases the connection slot
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    let _ = shutdown_tx.send(true);

    info!(
        active = sessions.len(),
        "Waiting for active connections to close..."
    );
    let drained = tokio::time::timeout(config.shutdown_timeout, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    // A session blocked writing to a client that stopped reading never sees
    // the broadcast.
    if drained.is_err() {
        warn!(
            remaining = sessions.len(),
            "Shutdown timeout elapsed, closing remaining connections"
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "All connections drained"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestServer {
        addr: SocketAddr,
        stop: oneshot::Sender<()>,
        task: JoinHandle<std::io::Result<Arc<ConnectionStats>>>,
    }

    async fn start(max_connections: Option<usize>) -> TestServer {
        let config = ServerConfig {
            max_connections,
            ..Default::default()
        };
        start_with(config, Arc::new(StorageEngine::new())).await
    }

    async fn start_with(config: ServerConfig, storage: Arc<StorageEngine>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = Dispatcher::with_builtin(storage);
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            run(listener, dispatcher, &config, async {
                let _ = stopped.await;
            })
            .await
        });

        TestServer { addr, stop, task }
    }

    async fn ping(client: &mut TcpStream) -> Vec<u8> {
        if client.write_all(b"*1\r\n$4\r\nPING\r\n").await.is_err() {
            return Vec::new();
        }
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_serves_clients_until_shutdown() {
        let server = start(None).await;

        let mut first = TcpStream::connect(server.addr).await.unwrap();
        let mut second = TcpStream::connect(server.addr).await.unwrap();
        assert_eq!(ping(&mut first).await, b"+PONG\r\n");
        assert_eq!(ping(&mut second).await, b"+PONG\r\n");

        server.stop.send(()).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), server.task)
            .await
            .expect("server did not drain")
            .unwrap()
            .unwrap();

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        // Idle sessions were closed by the shutdown broadcast.
        let mut buf = [0u8; 8];
        assert_eq!(first.read(&mut buf).await.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_connection_limit_drops_excess_clients() {
        let server = start(Some(1)).await;

        let mut first = TcpStream::connect(server.addr).await.unwrap();
        assert_eq!(ping(&mut first).await, b"+PONG\r\n");

        let mut second = TcpStream::connect(server.addr).await.unwrap();
        assert!(ping(&mut second).await.is_empty());

        // Freeing the slot lets the next client in.
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut third = TcpStream::connect(server.addr).await.unwrap();
        assert_eq!(ping(&mut third).await, b"+PONG\r\n");

        server.stop.send(()).unwrap();
        tokio_test::assert_ok!(server.task.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_sessions_stuck_writing() {
        let storage = Arc::new(StorageEngine::new());
        storage.set(Bytes::from("big"), Bytes::from(vec![b'x'; 1024 * 1024]));
        let config = ServerConfig {
            shutdown_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let server = start_with(config, storage).await;

        // Ask for ~100 MB of replies and never read them.
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        let requests = b"*2\r\n$3\r\nGET\r\n$3\r\nbig\r\n".repeat(100);
        client.write_all(&requests).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        server.stop.send(()).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(3), server.task)
            .await
            .expect("server did not finish shutting down")
            .unwrap()
            .unwrap();

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        drop(client);
    }
}

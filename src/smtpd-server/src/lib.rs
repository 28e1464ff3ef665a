// SPDX-License-Identifier: GPL-3.0-only

//! The accept loop and worker reactors: binds the listening socket, hands
//! each accepted connection round-robin to one of a fixed pool of worker
//! tasks, and drives the per-connection read/dispatch/write loop.
//!
//! The original system multiplexes sockets with a raw `epoll` loop per
//! worker thread. Every teacher repo in this workspace's lineage reaches
//! for `tokio` instead of hand-rolled readiness polling, so here each
//! "worker" is a persistent task owning its own [`tokio::task::JoinSet`]
//! of connection futures, fed through its own `mpsc` channel — no state is
//! ever shared between workers, preserving the spec's ownership rule.

use smtpd_config::Settings;
use smtpd_protocol::{handle_line, ConnectionState};
use smtpd_spf::Resolver;
use smtpd_storage::Storage;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Greeting capabilities advertised in the connection banner.
const ESMTP_HOST_LABEL: &str = "ESMTP SimpleSMTP";

/// Accepts connections and distributes them round-robin to `settings.workers`
/// worker tasks, each handling many connections concurrently.
pub struct Server<R: Resolver> {
    settings: Arc<Settings>,
    resolver: Arc<R>,
    storage: Storage,
}

impl<R: Resolver + 'static> Server<R> {
    #[must_use]
    pub fn new(settings: Settings, resolver: R, storage: Storage) -> Self {
        Self {
            settings: Arc::new(settings),
            resolver: Arc::new(resolver),
            storage,
        }
    }

    /// Binds the listening socket and runs the accept loop until the
    /// process is terminated or the listener errors out.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = bind_listener(self.settings.port, self.settings.backlog)?;
        tracing::info!(port = self.settings.port, workers = self.settings.workers, "listening");

        let mut worker_txs = Vec::with_capacity(self.settings.workers);
        for worker_id in 0..self.settings.workers {
            let (tx, rx) = mpsc::channel::<(TcpStream, String)>(self.settings.max_events);
            let settings = Arc::clone(&self.settings);
            let resolver = Arc::clone(&self.resolver);
            let storage = self.storage.handle();
            tokio::spawn(worker_loop(worker_id, rx, settings, resolver, storage));
            worker_txs.push(tx);
        }

        let mut next_worker = 0_usize;
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(%error, "accept failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                    continue;
                }
            };

            if let Err(error) = stream.set_nodelay(true) {
                tracing::warn!(%error, "failed to set TCP_NODELAY");
            }

            let peer_ip = addr.ip().to_string();
            let tx = &worker_txs[next_worker];
            if tx.send((stream, peer_ip)).await.is_err() {
                tracing::error!(worker_id = next_worker, "worker channel closed");
            }
            next_worker = (next_worker + 1) % worker_txs.len();
        }
    }
}

fn bind_listener(port: u16, backlog: i32) -> anyhow::Result<tokio::net::TcpListener> {
    use socket2::{Domain, Socket, Type};

    let address: std::net::SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    socket.listen(backlog)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(tokio::net::TcpListener::from_std(std_listener)?)
}

async fn worker_loop<R: Resolver + 'static>(
    worker_id: usize,
    mut accepted: mpsc::Receiver<(TcpStream, String)>,
    settings: Arc<Settings>,
    resolver: Arc<R>,
    storage: Storage,
) {
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            incoming = accepted.recv() => {
                let Some((stream, peer_ip)) = incoming else {
                    tracing::info!(worker_id, "accept channel closed, draining connections");
                    break;
                };
                let settings = Arc::clone(&settings);
                let resolver = Arc::clone(&resolver);
                let storage = storage.handle();
                connections.spawn(handle_connection(stream, peer_ip, settings, resolver, storage));
            }
            Some(result) = connections.join_next(), if !connections.is_empty() => {
                if let Err(error) = result {
                    tracing::warn!(worker_id, %error, "connection task panicked");
                }
            }
        }
    }

    while connections.join_next().await.is_some() {}
}

async fn handle_connection<R: Resolver>(
    mut stream: TcpStream,
    peer_ip: String,
    settings: Arc<Settings>,
    resolver: Arc<R>,
    mut storage: Storage,
) {
    let server_name = format!("mx.{}", local_host_label());

    if let Err(error) = write_line(&mut stream, &format!("220 {server_name} {ESMTP_HOST_LABEL}")).await {
        tracing::warn!(%error, "failed to send greeting");
        return;
    }

    let mut state = ConnectionState::new(peer_ip);
    let mut read_buf = vec![0_u8; settings.buf_sz];

    loop {
        let n = match stream.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) => {
                tracing::debug!(%error, "read error, closing connection");
                break;
            }
        };

        let lines = state.line_buffer.feed(&read_buf[..n]);
        let mut should_close = false;

        for line in lines {
            let outcome = handle_line(&mut state, &line, &server_name, resolver.as_ref(), &mut storage).await;
            for reply in &outcome.replies {
                if let Err(error) = write_line(&mut stream, reply).await {
                    tracing::debug!(%error, "write error, closing connection");
                    should_close = true;
                    break;
                }
            }
            if outcome.close {
                should_close = true;
            }
            if should_close {
                break;
            }
        }

        if should_close {
            let _ = stream.shutdown().await;
            break;
        }
    }
}

async fn write_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await
}

fn local_host_label() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}

//! # Reverse proxy for exported listeners.
//!
//! One [`Proxy`] exists per exported listener name. The supervisor binds
//! the accept socket and runs [`Proxy::serve`] on a background task; each
//! accepted connection is forwarded to one backend, chosen round-robin
//! over the proxy's mutable backend set. Replicas exporting the same
//! listener name add themselves as backends and share the one external
//! address.
//!
//! Backend churn never disturbs connections already in flight: forwarding
//! tasks own their streams and keep draining after the accept loop stops.
//! As long as any backend is reachable, an incoming connection is served;
//! a backend that fails to dial is skipped for that connection.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::logging::Logger;

/// A TCP reverse proxy with a dynamic backend set.
pub struct Proxy {
    backends: Mutex<Vec<String>>,
    next: AtomicUsize,
    logger: Logger,
}

impl Proxy {
    pub fn new(logger: Logger) -> Arc<Self> {
        Arc::new(Self {
            backends: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0),
            logger,
        })
    }

    /// Adds a backend address. Safe to call while the proxy is serving.
    pub fn add_backend(&self, addr: impl Into<String>) {
        self.backends.lock().push(addr.into());
    }

    /// Current backend count.
    pub fn backend_count(&self) -> usize {
        self.backends.lock().len()
    }

    /// The backends to try for one connection: the full set, rotated so
    /// consecutive connections start from consecutive backends.
    fn rotation(&self) -> Vec<String> {
        let backends = self.backends.lock();
        if backends.is_empty() {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % backends.len();
        let mut order = Vec::with_capacity(backends.len());
        order.extend_from_slice(&backends[start..]);
        order.extend_from_slice(&backends[..start]);
        order
    }

    /// Accept loop. Runs until `ctx` is cancelled or the listener fails;
    /// in-flight connections are left to drain either way.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, ctx: CancellationToken) -> io::Result<()> {
        loop {
            let inbound = tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _peer) = accepted?;
                    stream
                }
            };
            let proxy = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = proxy.forward(inbound).await {
                    debug!(err = %err, "proxy connection ended with error");
                }
            });
        }
    }

    /// Forwards one inbound connection to the first dialable backend.
    async fn forward(&self, mut inbound: TcpStream) -> io::Result<()> {
        let candidates = self.rotation();
        if candidates.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no backends registered",
            ));
        }
        let mut last_err = None;
        for backend in &candidates {
            match TcpStream::connect(backend).await {
                Ok(mut outbound) => {
                    tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
                    return Ok(());
                }
                Err(err) => {
                    self.logger.warn(
                        "proxy backend unreachable",
                        &[("backend", backend.as_str())],
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no reachable backend")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::logging::{LogEntry, Logger, LoggerOptions};

    fn test_logger() -> Logger {
        Logger::new(
            LoggerOptions {
                app: "test".to_string(),
                component: "proxy".to_string(),
                node: "n".to_string(),
                version: "v".to_string(),
                attrs: Vec::new(),
            },
            Arc::new(|_entry: LogEntry| {}),
        )
    }

    /// Echo server returning a fixed tag followed by whatever it reads.
    async fn spawn_backend(tag: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 64];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let mut reply = tag.as_bytes().to_vec();
                    reply.extend_from_slice(&buf[..n]);
                    let _ = stream.write_all(&reply).await;
                });
            }
        });
        addr
    }

    async fn round_trip(addr: &str, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn forwards_to_single_backend() {
        let backend = spawn_backend("one:").await;
        let proxy = Proxy::new(test_logger());
        proxy.add_backend(backend);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let ctx = CancellationToken::new();
        tokio::spawn(Arc::clone(&proxy).serve(listener, ctx.clone()));

        let reply = round_trip(&addr, b"ping").await;
        assert_eq!(reply, b"one:ping");
        ctx.cancel();
    }

    #[tokio::test]
    async fn rotates_across_backends() {
        let first = spawn_backend("first:").await;
        let second = spawn_backend("second:").await;
        let proxy = Proxy::new(test_logger());
        proxy.add_backend(first);
        proxy.add_backend(second);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let ctx = CancellationToken::new();
        tokio::spawn(Arc::clone(&proxy).serve(listener, ctx.clone()));

        let mut seen = std::collections::HashSet::new();
        for _ in 0..4 {
            let reply = round_trip(&addr, b"x").await;
            let tag = reply.split(|&b| b == b':').next().unwrap().to_vec();
            seen.insert(String::from_utf8(tag).unwrap());
        }
        assert_eq!(seen.len(), 2, "both backends should serve over time");
        ctx.cancel();
    }

    #[tokio::test]
    async fn skips_unreachable_backend() {
        // A bound-then-dropped listener gives an address nothing accepts
        // on.
        let dead = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().to_string()
        };
        let live = spawn_backend("live:").await;
        let proxy = Proxy::new(test_logger());
        proxy.add_backend(dead);
        proxy.add_backend(live);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let ctx = CancellationToken::new();
        tokio::spawn(Arc::clone(&proxy).serve(listener, ctx.clone()));

        for _ in 0..3 {
            let reply = round_trip(&addr, b"y").await;
            assert_eq!(reply, b"live:y");
        }
        ctx.cancel();
    }
}

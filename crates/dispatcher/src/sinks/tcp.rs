//! TcpSink - pushes newline-delimited JSON snapshots to every connected client

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use contracts::{ContractError, FusedSnapshot, SnapshotSink};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::DispatcherError;

const DEFAULT_CLIENT_BUFFER: usize = 64;

/// Sink serving a push stream; clients connect at any time and get every
/// snapshot from then on.
pub struct TcpSink {
    name: String,
    local_addr: SocketAddr,
    lines: Option<broadcast::Sender<Arc<str>>>,
    clients: Arc<AtomicUsize>,
    stop_tx: watch::Sender<bool>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpSink {
    /// Bind the listener and start accepting clients.
    ///
    /// `client_buffer` snapshots may queue per client before a slow client
    /// starts skipping.
    #[instrument(name = "tcp_sink_bind", skip(name))]
    pub async fn bind(
        name: impl Into<String>,
        addr: SocketAddr,
        client_buffer: usize,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (lines, _) = broadcast::channel(client_buffer.max(1));
        let clients = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        let acceptor = tokio::spawn(accept_loop(
            name.clone(),
            listener,
            lines.clone(),
            Arc::clone(&clients),
            stop_rx,
        ));

        info!(sink = %name, addr = %local_addr, "TcpSink listening");
        Ok(Self {
            name,
            local_addr,
            lines: Some(lines),
            clients,
            stop_tx,
            acceptor: Some(acceptor),
        })
    }

    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let addr_str = params
            .get("addr")
            .ok_or_else(|| DispatcherError::invalid_param(&name, "addr", "missing"))?;
        let addr: SocketAddr = addr_str.parse().map_err(|e| {
            DispatcherError::invalid_param(&name, "addr", format!("invalid address '{addr_str}': {e}"))
        })?;
        let client_buffer = match params.get("client_buffer") {
            Some(raw) => raw.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                DispatcherError::invalid_param(&name, "client_buffer", format!("expected a positive integer, got '{raw}'"))
            })?,
            None => DEFAULT_CLIENT_BUFFER,
        };

        Self::bind(name.clone(), addr, client_buffer)
            .await
            .map_err(|e| DispatcherError::sink_creation(name, e.to_string()))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Currently connected clients
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

async fn accept_loop(
    sink: String,
    listener: TcpListener,
    lines: broadcast::Sender<Arc<str>>,
    clients: Arc<AtomicUsize>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    // subscribe before spawning so the client sees the next snapshot
                    let rx = lines.subscribe();
                    clients.fetch_add(1, Ordering::Relaxed);
                    debug!(sink = %sink, %peer, "client connected");
                    tokio::spawn(serve_client(sink.clone(), stream, peer, rx, Arc::clone(&clients)));
                }
                Err(e) => warn!(sink = %sink, error = %e, "accept failed"),
            },
        }
    }
    debug!(sink = %sink, "accept loop stopped");
}

async fn serve_client(
    sink: String,
    mut stream: TcpStream,
    peer: SocketAddr,
    mut rx: broadcast::Receiver<Arc<str>>,
    clients: Arc<AtomicUsize>,
) {
    loop {
        match rx.recv().await {
            Ok(line) => {
                if let Err(e) = stream.write_all(line.as_bytes()).await {
                    debug!(sink = %sink, %peer, error = %e, "client write failed");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                metrics::counter!("echosense_tcp_client_lagged_total", "sink" => sink.clone())
                    .increment(n);
                warn!(sink = %sink, %peer, skipped = n, "slow client skipped snapshots");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = stream.shutdown().await;
    clients.fetch_sub(1, Ordering::Relaxed);
    debug!(sink = %sink, %peer, "client disconnected");
}

impl SnapshotSink for TcpSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "tcp_sink_write",
        skip(self, snapshot),
        fields(sink = %self.name, tick_id = snapshot.tick_id)
    )]
    async fn write(&mut self, snapshot: &FusedSnapshot) -> Result<(), ContractError> {
        let lines = self
            .lines
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "sink closed"))?;
        let mut line = serde_json::to_string(snapshot)
            .map_err(|e| ContractError::sink_write(&self.name, format!("json error: {e}")))?;
        line.push('\n');
        // no clients connected is not an error
        let _ = lines.send(Arc::from(line));
        Ok(())
    }

    #[instrument(name = "tcp_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    /// Stop accepting; connected clients receive what is queued, then EOF.
    #[instrument(name = "tcp_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.stop_tx.send_replace(true);
        self.lines = None;
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.await;
        }
        debug!(sink = %self.name, "TcpSink closed");
        Ok(())
    }
}

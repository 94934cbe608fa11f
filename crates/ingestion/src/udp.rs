//! UDP listener source
//!
//! One socket per source stream. The decoder (and the conditioner inside it)
//! moves into the receive task, so conditioning state is never shared.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use contracts::{SensorEventCallback, SignalSource, SourceId, SourceKind};
use metrics::counter;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::IngestionMetrics;
use crate::decoder::{EventDecoder, StreamClock};
use crate::error::{IngestionError, Result};

/// Largest datagram read in one go
const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpSignalSource {
    source_id: SourceId,
    kind: SourceKind,
    local_addr: SocketAddr,
    /// Consumed by the first `listen`
    pending: Mutex<Option<(std::net::UdpSocket, EventDecoder)>>,
    listening: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    metrics: Arc<IngestionMetrics>,
}

impl UdpSignalSource {
    /// Bind the socket now so address errors surface at startup.
    #[instrument(name = "udp_source_bind", skip(decoder, metrics), fields(source_id = %source_id, kind = %decoder.kind()))]
    pub fn bind(
        source_id: SourceId,
        addr: SocketAddr,
        decoder: EventDecoder,
        metrics: Arc<IngestionMetrics>,
    ) -> Result<Self> {
        let socket = std::net::UdpSocket::bind(addr)
            .map_err(|e| IngestionError::bind(source_id.as_str(), addr, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| IngestionError::bind(source_id.as_str(), addr, e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| IngestionError::bind(source_id.as_str(), addr, e))?;

        info!(local_addr = %local_addr, "udp source bound");

        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            source_id,
            kind: decoder.kind(),
            local_addr,
            pending: Mutex::new(Some((socket, decoder))),
            listening: Arc::new(AtomicBool::new(false)),
            stop_tx,
            metrics,
        })
    }

    /// Actual bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn take_pending(&self) -> Option<(std::net::UdpSocket, EventDecoder)> {
        match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl SignalSource for UdpSignalSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn listen(&self, callback: SensorEventCallback) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some((std_socket, mut decoder)) = self.take_pending() else {
            warn!(source_id = %self.source_id, "udp source was stopped and cannot restart");
            self.listening.store(false, Ordering::SeqCst);
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!(source_id = %self.source_id, "no tokio runtime, udp source not started");
            self.listening.store(false, Ordering::SeqCst);
            return;
        };

        let source_id = self.source_id.clone();
        let listening = self.listening.clone();
        let metrics = self.metrics.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        handle.spawn(async move {
            let socket = match UdpSocket::from_std(std_socket) {
                Ok(s) => s,
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "failed to register udp socket");
                    listening.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let mut clock = StreamClock::global();
            let mut buf = BytesMut::with_capacity(MAX_DATAGRAM);
            debug!(source_id = %source_id, "udp receive loop started");

            loop {
                buf.clear();
                buf.reserve(MAX_DATAGRAM);
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    res = socket.recv_buf_from(&mut buf) => match res {
                        Ok((_, peer)) => {
                            let ts = clock.next();
                            match decoder.decode(&source_id, ts, &buf) {
                                Ok(event) => callback(event),
                                Err(e) => {
                                    metrics.record_parse_error();
                                    counter!(
                                        "echosense_parse_errors_total",
                                        "source_id" => source_id.to_string()
                                    )
                                    .increment(1);
                                    debug!(source_id = %source_id, peer = %peer, error = %e, "payload dropped");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(source_id = %source_id, error = %e, "udp receive failed");
                        }
                    }
                }
            }

            listening.store(false, Ordering::SeqCst);
            debug!(source_id = %source_id, "udp receive loop stopped");
        });
    }

    fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.listening.store(false, Ordering::SeqCst);
        // a never-started socket is released here
        drop(self.take_pending());
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{EventPayload, FusionBlueprint, SensorEvent};
    use std::time::Duration;

    fn source(kind: SourceKind, metrics: Arc<IngestionMetrics>) -> UdpSignalSource {
        UdpSignalSource::bind(
            "esp8266".into(),
            "127.0.0.1:0".parse().unwrap(),
            EventDecoder::for_kind(kind, &FusionBlueprint::empty()),
            metrics,
        )
        .unwrap()
    }

    fn collector() -> (SensorEventCallback, async_channel::Receiver<SensorEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (
            Arc::new(move |ev| {
                let _ = tx.try_send(ev);
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn receives_and_decodes_datagrams() {
        let metrics = Arc::new(IngestionMetrics::new());
        let src = source(SourceKind::WifiRssi, metrics.clone());
        let (cb, rx) = collector();
        src.listen(cb);
        assert!(src.is_listening());

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        for rssi in [-50, -51, -49] {
            sender
                .send_to(format!("RSS:{rssi}").as_bytes(), src.local_addr())
                .unwrap();
        }

        let mut got = Vec::new();
        for _ in 0..3 {
            let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            got.push(ev);
        }
        assert!(got.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
        match &got[0].payload {
            EventPayload::Signal(s) => assert_eq!(s.rssi, Some(-50)),
            other => panic!("unexpected payload {other:?}"),
        }
        src.stop();
    }

    #[tokio::test]
    async fn malformed_datagrams_are_counted_and_skipped() {
        let metrics = Arc::new(IngestionMetrics::new());
        let src = source(SourceKind::WifiRssi, metrics.clone());
        let (cb, rx) = collector();
        src.listen(cb);

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", src.local_addr()).unwrap();
        sender.send_to(b"RSS:-60", src.local_addr()).unwrap();

        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.source_id, "esp8266");
        assert_eq!(metrics.snapshot().parse_errors, 1);
        src.stop();
    }

    #[tokio::test]
    async fn stop_ends_loop_and_cannot_restart() {
        let metrics = Arc::new(IngestionMetrics::new());
        let src = source(SourceKind::WifiRssi, metrics);
        let (cb, _rx) = collector();
        src.listen(cb.clone());
        src.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!src.is_listening());

        src.listen(cb);
        assert!(!src.is_listening());
    }

    #[test]
    fn bind_conflict_is_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let err = UdpSignalSource::bind(
            "esp8266".into(),
            taken.local_addr().unwrap(),
            EventDecoder::for_kind(SourceKind::WifiRssi, &FusionBlueprint::empty()),
            Arc::new(IngestionMetrics::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, IngestionError::Bind { .. }));
    }
}

//! NetworkSink - one UDP datagram per snapshot

use std::collections::HashMap;
use std::net::SocketAddr;

use contracts::{ContractError, FusedSnapshot, SnapshotSink};
use tokio::net::UdpSocket;
use tracing::{debug, instrument, warn};

use crate::error::DispatcherError;

/// Largest UDP payload over IPv4
const MAX_DATAGRAM: usize = 65507;

/// Serialization format for network transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkFormat {
    /// JSON (human-readable, larger)
    #[default]
    Json,
    /// Bincode (binary, compact)
    Bincode,
}

/// Configuration for NetworkSink
#[derive(Debug, Clone)]
pub struct NetworkSinkConfig {
    pub addr: SocketAddr,
    pub format: NetworkFormat,
    /// Snapshots that serialize larger than this are refused
    pub max_packet_size: usize,
}

impl NetworkSinkConfig {
    pub fn from_params(name: &str, params: &HashMap<String, String>) -> Result<Self, DispatcherError> {
        let addr_str = params
            .get("addr")
            .ok_or_else(|| DispatcherError::invalid_param(name, "addr", "missing"))?;
        let addr: SocketAddr = addr_str.parse().map_err(|e| {
            DispatcherError::invalid_param(name, "addr", format!("invalid address '{addr_str}': {e}"))
        })?;

        let format = match params.get("format").map(String::as_str) {
            Some("bincode") => NetworkFormat::Bincode,
            Some("json") | None => NetworkFormat::Json,
            Some(other) => {
                return Err(DispatcherError::invalid_param(
                    name,
                    "format",
                    format!("unknown format '{other}'"),
                ));
            }
        };

        let max_packet_size = match params.get("max_packet_size") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=MAX_DATAGRAM).contains(n))
                .ok_or_else(|| {
                    DispatcherError::invalid_param(
                        name,
                        "max_packet_size",
                        format!("expected 1..={MAX_DATAGRAM}, got '{raw}'"),
                    )
                })?,
            None => 65000,
        };

        Ok(Self {
            addr,
            format,
            max_packet_size,
        })
    }
}

/// Fire-and-forget UDP sink
pub struct NetworkSink {
    name: String,
    config: NetworkSinkConfig,
    socket: Option<UdpSocket>,
}

impl NetworkSink {
    #[instrument(name = "network_sink_new", skip(name, config), fields(target = %config.addr))]
    pub async fn new(name: impl Into<String>, config: NetworkSinkConfig) -> std::io::Result<Self> {
        let name = name.into();
        let bind_addr = if config.addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(&config.addr).await?;

        debug!(sink = %name, target = %config.addr, "NetworkSink connected");

        Ok(Self {
            name,
            config,
            socket: Some(socket),
        })
    }

    pub async fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let config = NetworkSinkConfig::from_params(&name, params)?;
        Self::new(name.clone(), config)
            .await
            .map_err(|e| DispatcherError::sink_creation(name, e.to_string()))
    }

    fn encode(&self, snapshot: &FusedSnapshot) -> Result<Vec<u8>, ContractError> {
        let data = match self.config.format {
            NetworkFormat::Json => serde_json::to_vec(snapshot)
                .map_err(|e| ContractError::sink_write(&self.name, format!("json error: {e}")))?,
            NetworkFormat::Bincode => bincode::serialize(snapshot)
                .map_err(|e| ContractError::sink_write(&self.name, format!("bincode error: {e}")))?,
        };

        if data.len() > self.config.max_packet_size {
            warn!(
                sink = %self.name,
                size = data.len(),
                max = self.config.max_packet_size,
                "snapshot too large for one datagram"
            );
            return Err(ContractError::sink_write(
                &self.name,
                format!(
                    "snapshot of {} bytes exceeds max_packet_size {}",
                    data.len(),
                    self.config.max_packet_size
                ),
            ));
        }
        Ok(data)
    }
}

impl SnapshotSink for NetworkSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_sink_write",
        skip(self, snapshot),
        fields(sink = %self.name, tick_id = snapshot.tick_id)
    )]
    async fn write(&mut self, snapshot: &FusedSnapshot) -> Result<(), ContractError> {
        let data = self.encode(snapshot)?;
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "socket closed"))?;

        match socket.send(&data).await {
            Ok(sent) => debug!(sink = %self.name, bytes = sent, "sent"),
            // nobody listening yet
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!(sink = %self.name, "no receiver at target");
            }
            Err(e) => return Err(ContractError::sink_write(&self.name, e.to_string())),
        }
        Ok(())
    }

    #[instrument(name = "network_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "network_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        debug!(sink = %self.name, "NetworkSink closed");
        Ok(())
    }
}

//! Sink implementations

mod file;
mod log;
mod network;
mod tcp;

pub use self::file::{FileSink, FileSinkConfig};
pub use self::log::LogSink;
pub use self::network::{NetworkFormat, NetworkSink, NetworkSinkConfig};
pub use self::tcp::TcpSink;

pub mod block;
pub mod client;
pub mod commands;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

// Re-export the main types from client
pub use client::{
    ChannelStatus, ConnectionConfig, ScopeClient, ScopeClientBuilder, SystemStatus,
    TimeMeasurements, VoltageMeasurements, MAX_ERROR_DRAIN,
};
pub use client::acquisition::AcquireType;
pub use client::waveform::CaptureRequest;
pub use commands::{lookup, Command, ReplyShape, SlotKind, VOCABULARY};
pub use transport::{
    Connector, DefaultConnector, DeviceFileTransport, Interrupt, TcpTransport, Transport,
};

//! Driver core for SCPI bench oscilloscopes (Rigol DHO900 series).
//!
//! [`ScopeClient`] runs one command/reply transaction at a time over a
//! [`Transport`], picking how to read the reply from the static command
//! vocabulary. Waveform transfers are decoded into time/voltage records by
//! [`decode_waveform`].

pub mod error;
pub mod plotting;
pub mod scpi;
pub mod types;
pub mod utils;
pub mod waveform;

pub use error::{ErrorClass, ScopeError};
pub use plotting::{plot_values, plot_waveform};
pub use scpi::{
    AcquireType, CaptureRequest, ChannelStatus, ConnectionConfig, Connector, DefaultConnector,
    Interrupt, ScopeClient, ScopeClientBuilder, SystemStatus, TimeMeasurements, Transport,
    VoltageMeasurements,
};
pub use types::{
    Arg, Channel, Coupling, Endpoint, ErrorEntry, Identity, MeasurementType, Reply,
    ScpiErrorKind, TransportKind, TriggerSlope, WaveformSource,
};
pub use waveform::{
    decode_waveform, decode_with_preamble, WaveformFormat, WaveformPreamble, WaveformRecord,
    WaveformSample,
};

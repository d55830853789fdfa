use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::ScopeError;

/// A value substituted into a command template slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
    /// SCPI mnemonic or free text (`CHAN1`, `ON`, `DC`, `VPP`)
    Word(String),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Word(v) => write!(f, "{v}"),
        }
    }
}

impl Arg {
    /// Interpret command-line text: integers first, then floats, anything else is a word.
    pub fn from_literal(text: &str) -> Self {
        let text = text.trim();
        if let Ok(v) = text.parse::<i64>() {
            Arg::Int(v)
        } else if let Ok(v) = text.parse::<f64>() {
            Arg::Float(v)
        } else {
            Arg::Word(text.to_string())
        }
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Word(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Word(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Word(if value { "ON" } else { "OFF" }.to_string())
    }
}

impl From<Channel> for Arg {
    fn from(channel: Channel) -> Self {
        Arg::Int(channel.0 as i64)
    }
}

/// Result of one transaction. Its variant is fixed by the command's declared reply shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Empty,
    Text(String),
    Block(Vec<u8>),
}

impl Reply {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Reply::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_block(self) -> Option<Vec<u8>> {
        match self {
            Reply::Block(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Physical link used to reach the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local bus exposed as a character device (USBTMC, serial adapter)
    LocalBus,
    #[default]
    Network,
}

/// Where to find the instrument for a given [`TransportKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Network { host: String, port: u16 },
    LocalBus { path: PathBuf },
}

impl Endpoint {
    pub fn kind(&self) -> TransportKind {
        match self {
            Endpoint::Network { .. } => TransportKind::Network,
            Endpoint::LocalBus { .. } => TransportKind::LocalBus,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Network { host, port } => write!(f, "{host}:{port}"),
            Endpoint::LocalBus { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Entry popped from the instrument's error queue (`SYST:ERR?`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: i32,
    pub message: String,
}

/// SCPI error classes, by code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpiErrorKind {
    Command,
    Execution,
    DeviceSpecific,
    Query,
    PowerOn,
    UserRequest,
    RequestControl,
    OperationComplete,
    /// Positive codes are defined by the instrument vendor
    Instrument,
    Other,
}

impl ErrorEntry {
    /// Parse a `SYST:ERR?` reply such as `-113,"Undefined header"`.
    ///
    /// Returns `Ok(None)` for the "no error" entry (code 0).
    pub fn parse(reply: &str) -> Result<Option<Self>, ScopeError> {
        let reply = reply.trim();
        let (code, message) = reply.split_once(',').unwrap_or((reply, ""));
        let code: i32 = code.trim().parse().map_err(|_| {
            ScopeError::malformed("SYST:ERR?", format!("bad error code in '{reply}'"), reply.as_bytes())
        })?;

        if code == 0 {
            return Ok(None);
        }

        Ok(Some(Self {
            code,
            message: message.trim().trim_matches('"').to_string(),
        }))
    }

    pub fn kind(&self) -> ScpiErrorKind {
        match self.code {
            -199..=-100 => ScpiErrorKind::Command,
            -299..=-200 => ScpiErrorKind::Execution,
            -399..=-300 => ScpiErrorKind::DeviceSpecific,
            -499..=-400 => ScpiErrorKind::Query,
            -599..=-500 => ScpiErrorKind::PowerOn,
            -699..=-600 => ScpiErrorKind::UserRequest,
            -799..=-700 => ScpiErrorKind::RequestControl,
            -899..=-800 => ScpiErrorKind::OperationComplete,
            c if c > 0 => ScpiErrorKind::Instrument,
            _ => ScpiErrorKind::Other,
        }
    }

    /// Escalate an advisory entry into an error, for callers that treat it as a fault.
    pub fn into_error(self) -> ScopeError {
        ScopeError::Instrument {
            code: self.code,
            message: self.message,
        }
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

/// Parsed `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    pub fn parse(reply: &str) -> Result<Self, ScopeError> {
        let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
        match fields.as_slice() {
            [manufacturer, model, serial, firmware] => Ok(Self {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
                serial: serial.to_string(),
                firmware: firmware.to_string(),
            }),
            _ => Err(ScopeError::malformed(
                "*IDN?",
                format!("expected 4 identity fields, got {}", fields.len()),
                reply.as_bytes(),
            )),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, FW {})",
            self.manufacturer, self.model, self.serial, self.firmware
        )
    }
}

/// Analog input channel, 1-4 on the DHO900 series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Channel(u8);

impl Channel {
    pub const COUNT: u8 = 4;

    pub fn new(number: u8) -> Result<Self, ScopeError> {
        if (1..=Self::COUNT).contains(&number) {
            Ok(Channel(number))
        } else {
            Err(ScopeError::InvalidArgument(format!(
                "Channel must be 1-{}, got {}",
                Self::COUNT,
                number
            )))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=Self::COUNT).map(Channel)
    }

    /// SCPI source mnemonic, e.g. `CHAN2`
    pub fn mnemonic(self) -> String {
        format!("CHAN{}", self.0)
    }
}

impl TryFrom<u8> for Channel {
    type Error = ScopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Channel::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling {
    Ac,
    Dc,
    Gnd,
}

impl Coupling {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Coupling::Ac => "AC",
            Coupling::Dc => "DC",
            Coupling::Gnd => "GND",
        }
    }
}

impl std::str::FromStr for Coupling {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AC" => Ok(Coupling::Ac),
            "DC" => Ok(Coupling::Dc),
            "GND" => Ok(Coupling::Gnd),
            other => Err(ScopeError::InvalidArgument(format!(
                "Coupling must be AC, DC or GND, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSlope {
    Positive,
    Negative,
    Either,
}

impl TriggerSlope {
    pub fn mnemonic(self) -> &'static str {
        match self {
            TriggerSlope::Positive => "POS",
            TriggerSlope::Negative => "NEG",
            TriggerSlope::Either => "RFAL",
        }
    }
}

impl std::str::FromStr for TriggerSlope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "POS" | "POSITIVE" => Ok(TriggerSlope::Positive),
            "NEG" | "NEGATIVE" => Ok(TriggerSlope::Negative),
            "RFAL" => Ok(TriggerSlope::Either),
            other => Err(ScopeError::InvalidArgument(format!(
                "Trigger slope must be POS, NEG or RFAL, got {other}"
            ))),
        }
    }
}

/// Data source for a waveform transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformSource {
    Channel(Channel),
    Math,
}

impl WaveformSource {
    pub fn mnemonic(self) -> String {
        match self {
            WaveformSource::Channel(channel) => channel.mnemonic(),
            WaveformSource::Math => "MATH".to_string(),
        }
    }
}

impl From<Channel> for WaveformSource {
    fn from(channel: Channel) -> Self {
        WaveformSource::Channel(channel)
    }
}

/// Automatic measurement items understood by `MEAS:ITEM?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementType {
    VoltageMax,
    VoltageMin,
    VoltagePeakToPeak,
    VoltageTop,
    VoltageBase,
    VoltageAmplitude,
    VoltageAverage,
    VoltageRms,
    Overshoot,
    Preshoot,
    Period,
    Frequency,
    RiseTime,
    FallTime,
    PositiveWidth,
    NegativeWidth,
    PositiveDuty,
    NegativeDuty,
    Phase,
}

impl MeasurementType {
    pub fn mnemonic(self) -> &'static str {
        match self {
            MeasurementType::VoltageMax => "VMAX",
            MeasurementType::VoltageMin => "VMIN",
            MeasurementType::VoltagePeakToPeak => "VPP",
            MeasurementType::VoltageTop => "VTOP",
            MeasurementType::VoltageBase => "VBAS",
            MeasurementType::VoltageAmplitude => "VAMP",
            MeasurementType::VoltageAverage => "VAVG",
            MeasurementType::VoltageRms => "VRMS",
            MeasurementType::Overshoot => "OVER",
            MeasurementType::Preshoot => "PRES",
            MeasurementType::Period => "PER",
            MeasurementType::Frequency => "FREQ",
            MeasurementType::RiseTime => "RTIM",
            MeasurementType::FallTime => "FTIM",
            MeasurementType::PositiveWidth => "PWID",
            MeasurementType::NegativeWidth => "NWID",
            MeasurementType::PositiveDuty => "PDUT",
            MeasurementType::NegativeDuty => "NDUT",
            MeasurementType::Phase => "RRPH",
        }
    }
}

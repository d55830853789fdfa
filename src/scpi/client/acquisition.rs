//! Run control, timebase, trigger and acquisition settings.

use super::ScopeClient;
use crate::error::ScopeError;
use crate::types::{Arg, TriggerSlope, WaveformSource};

/// Acquisition modes accepted by `ACQ:TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireType {
    Normal,
    Average,
    Peak,
    HighResolution,
}

impl AcquireType {
    pub fn mnemonic(self) -> &'static str {
        match self {
            AcquireType::Normal => "NORM",
            AcquireType::Average => "AVER",
            AcquireType::Peak => "PEAK",
            AcquireType::HighResolution => "HRES",
        }
    }
}

impl std::str::FromStr for AcquireType {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "NORM" | "NORMAL" => Ok(AcquireType::Normal),
            "AVER" | "AVERAGE" => Ok(AcquireType::Average),
            "PEAK" => Ok(AcquireType::Peak),
            "HRES" | "HIGHRES" => Ok(AcquireType::HighResolution),
            other => Err(ScopeError::InvalidArgument(format!(
                "Acquisition type must be NORM, AVER, PEAK or HRES, got {other}"
            ))),
        }
    }
}

pub const TIMEBASE_MODES: &[&str] = &["MAIN", "ZOOM", "XY", "ROLL"];
pub const TRIGGER_MODES: &[&str] = &[
    "EDGE", "PULS", "RUNT", "WIND", "NEDG", "SLOP", "VID", "PATT", "DEL", "TIM", "DUR", "SHOL",
    "RS232", "IIC", "SPI",
];
pub const TRIGGER_COUPLINGS: &[&str] = &["AC", "DC", "LFR", "HFR"];

fn one_of(what: &str, allowed: &[&str], value: &str) -> Result<Arg, ScopeError> {
    let value = value.trim().to_ascii_uppercase();
    if allowed.contains(&value.as_str()) {
        Ok(Arg::Word(value))
    } else {
        Err(ScopeError::InvalidArgument(format!(
            "{what} must be one of {allowed:?}, got '{value}'"
        )))
    }
}

fn finite(what: &str, value: f64) -> Result<Arg, ScopeError> {
    if value.is_finite() {
        Ok(Arg::Float(value))
    } else {
        Err(ScopeError::InvalidArgument(format!("{what} must be finite, got {value}")))
    }
}

impl ScopeClient {
    pub fn run(&self) -> Result<(), ScopeError> {
        self.send("run", &[])
    }

    pub fn stop(&self) -> Result<(), ScopeError> {
        self.send("stop", &[])
    }

    /// Arm a single acquisition.
    pub fn single(&self) -> Result<(), ScopeError> {
        self.send("single", &[])
    }

    pub fn force_trigger(&self) -> Result<(), ScopeError> {
        self.send("force_trigger", &[])
    }

    /// Trigger state as reported by the instrument (`TD`, `WAIT`, `RUN`, `AUTO` or `STOP`).
    pub fn trigger_status(&self) -> Result<String, ScopeError> {
        Ok(self.query("trigger_status", &[])?.trim().to_string())
    }

    /// Horizontal scale in seconds per division.
    pub fn timebase_scale(&self) -> Result<f64, ScopeError> {
        self.query_f64("timebase_scale_query", &[])
    }

    pub fn set_timebase_scale(&self, seconds_per_div: f64) -> Result<(), ScopeError> {
        if !(seconds_per_div.is_finite() && seconds_per_div > 0.0) {
            return Err(ScopeError::InvalidArgument(format!(
                "timebase scale must be positive, got {seconds_per_div}"
            )));
        }
        self.send("timebase_scale", &[seconds_per_div.into()])
    }

    pub fn timebase_offset(&self) -> Result<f64, ScopeError> {
        self.query_f64("timebase_offset_query", &[])
    }

    pub fn set_timebase_offset(&self, seconds: f64) -> Result<(), ScopeError> {
        self.send("timebase_offset", &[finite("timebase offset", seconds)?])
    }

    pub fn timebase_mode(&self) -> Result<String, ScopeError> {
        Ok(self.query("timebase_mode_query", &[])?.trim().to_string())
    }

    pub fn set_timebase_mode(&self, mode: &str) -> Result<(), ScopeError> {
        self.send("timebase_mode", &[one_of("timebase mode", TIMEBASE_MODES, mode)?])
    }

    pub fn set_trigger_mode(&self, mode: &str) -> Result<(), ScopeError> {
        self.send("trigger_mode", &[one_of("trigger mode", TRIGGER_MODES, mode)?])
    }

    pub fn set_trigger_coupling(&self, coupling: &str) -> Result<(), ScopeError> {
        self.send(
            "trigger_coupling",
            &[one_of("trigger coupling", TRIGGER_COUPLINGS, coupling)?],
        )
    }

    pub fn set_trigger_holdoff(&self, seconds: f64) -> Result<(), ScopeError> {
        if !(seconds.is_finite() && seconds >= 0.0) {
            return Err(ScopeError::InvalidArgument(format!(
                "holdoff must not be negative, got {seconds}"
            )));
        }
        self.send("trigger_holdoff", &[seconds.into()])
    }

    pub fn trigger_source(&self) -> Result<String, ScopeError> {
        Ok(self.query("trigger_edge_source_query", &[])?.trim().to_string())
    }

    pub fn set_trigger_source(&self, source: impl Into<WaveformSource>) -> Result<(), ScopeError> {
        self.send("trigger_edge_source", &[source.into().mnemonic().into()])
    }

    pub fn trigger_level(&self) -> Result<f64, ScopeError> {
        self.query_f64("trigger_edge_level_query", &[])
    }

    pub fn set_trigger_level(&self, volts: f64) -> Result<(), ScopeError> {
        self.send("trigger_edge_level", &[finite("trigger level", volts)?])
    }

    pub fn trigger_slope(&self) -> Result<TriggerSlope, ScopeError> {
        self.query_parsed("trigger_edge_slope_query", &[])
    }

    pub fn set_trigger_slope(&self, slope: TriggerSlope) -> Result<(), ScopeError> {
        self.send("trigger_edge_slope", &[slope.mnemonic().into()])
    }

    pub fn acquire_type(&self) -> Result<AcquireType, ScopeError> {
        self.query_parsed("acquire_type_query", &[])
    }

    pub fn set_acquire_type(&self, kind: AcquireType) -> Result<(), ScopeError> {
        self.send("acquire_type", &[kind.mnemonic().into()])
    }

    /// Number of averages in average mode, a power of two from 2 to 65536.
    pub fn set_acquire_averages(&self, count: u32) -> Result<(), ScopeError> {
        if !(2..=65536).contains(&count) || !count.is_power_of_two() {
            return Err(ScopeError::InvalidArgument(format!(
                "average count must be a power of two between 2 and 65536, got {count}"
            )));
        }
        self.send("acquire_averages", &[count.into()])
    }

    /// Memory depth as the instrument reports it, e.g. `AUTO` or `1.0000E+06`.
    pub fn memory_depth(&self) -> Result<String, ScopeError> {
        Ok(self.query("acquire_memory_depth_query", &[])?.trim().to_string())
    }

    /// Set memory depth; `depth` is `AUTO` or a point count such as `1M` or `10k`.
    pub fn set_memory_depth(&self, depth: &str) -> Result<(), ScopeError> {
        let depth = depth.trim().to_ascii_uppercase();
        if depth.is_empty() || !depth.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(ScopeError::InvalidArgument(format!(
                "invalid memory depth '{depth}'"
            )));
        }
        self.send("acquire_memory_depth", &[Arg::Word(depth)])
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::client_with;
    use super::*;
    use crate::scpi::mock::MockTransport;
    use crate::types::Channel;

    #[test]
    fn test_run_control() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        client.stop().unwrap();
        client.single().unwrap();
        client.force_trigger().unwrap();
        client.run().unwrap();

        assert_eq!(handle.written(), vec!["STOP", "SING", "TFOR", "RUN"]);
        assert_eq!(handle.reads(), 0);
    }

    #[test]
    fn test_trigger_setup() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        client.set_trigger_mode("edge").unwrap();
        client.set_trigger_source(Channel::new(2).unwrap()).unwrap();
        client.set_trigger_level(1.25).unwrap();
        client.set_trigger_slope(TriggerSlope::Negative).unwrap();
        client.set_trigger_coupling("DC").unwrap();
        client.set_trigger_holdoff(1e-6).unwrap();

        assert_eq!(
            handle.written(),
            vec![
                "TRIG:MODE EDGE",
                "TRIG:EDGE:SOUR CHAN2",
                "TRIG:EDGE:LEV 1.25",
                "TRIG:EDGE:SLOP NEG",
                "TRIG:COUP DC",
                "TRIG:HOLD 0.000001",
            ]
        );
    }

    #[test]
    fn test_timebase_and_acquisition() {
        let transport = MockTransport::with_responder(|line| {
            let reply: &[u8] = match line {
                "TIM:SCAL?" => b"5.000000e-04\n",
                "ACQ:TYPE?" => b"AVER\n",
                "TRIG:EDGE:SLOP?" => b"POS\n",
                "TRIG:STAT?" => b"WAIT\n",
                _ => return None,
            };
            Some(reply.to_vec())
        });
        let handle = transport.handle();
        let client = client_with(transport);

        assert_eq!(client.timebase_scale().unwrap(), 5e-4);
        assert_eq!(client.acquire_type().unwrap(), AcquireType::Average);
        assert_eq!(client.trigger_slope().unwrap(), TriggerSlope::Positive);
        assert_eq!(client.trigger_status().unwrap(), "WAIT");

        client.set_timebase_mode("roll").unwrap();
        client.set_acquire_type(AcquireType::HighResolution).unwrap();
        client.set_acquire_averages(64).unwrap();
        client.set_memory_depth("1m").unwrap();

        let written = handle.written();
        assert_eq!(
            &written[4..],
            &["TIM:MODE ROLL", "ACQ:TYPE HRES", "ACQ:AVER 64", "ACQ:MDEP 1M"]
        );
    }

    #[test]
    fn test_invalid_settings_never_reach_the_instrument() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let client = client_with(transport);

        assert!(client.set_timebase_scale(-1.0).is_err());
        assert!(client.set_timebase_mode("SIDEWAYS").is_err());
        assert!(client.set_trigger_mode("EDGE;*RST").is_err());
        assert!(client.set_trigger_level(f64::INFINITY).is_err());
        assert!(client.set_trigger_holdoff(-1.0).is_err());
        assert!(client.set_acquire_averages(3).is_err());
        assert!(client.set_acquire_averages(1 << 20).is_err());
        assert!(client.set_memory_depth("1M;*RST").is_err());

        assert!(handle.written().is_empty());
    }
}

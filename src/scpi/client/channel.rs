use log::debug;

use super::ScopeClient;
use crate::error::ScopeError;
use crate::types::{Arg, Channel, Coupling};

/// Bandwidth limit settings accepted by `CHANn:BWL`.
pub const BANDWIDTH_LIMITS: &[&str] = &["OFF", "20M", "100M", "200M"];

fn parse_switch(name: &str, reply: &str) -> Result<bool, ScopeError> {
    match reply.trim() {
        "1" | "ON" => Ok(true),
        "0" | "OFF" => Ok(false),
        other => Err(ScopeError::malformed(
            name,
            format!("'{other}' is not an on/off state"),
            reply.as_bytes(),
        )),
    }
}

impl ScopeClient {
    pub fn channel_enabled(&self, channel: Channel) -> Result<bool, ScopeError> {
        let reply = self.query("channel_display_query", &[channel.into()])?;
        parse_switch("CHAN:DISP?", &reply)
    }

    pub fn set_channel_enabled(&self, channel: Channel, enabled: bool) -> Result<(), ScopeError> {
        debug!("{} display {}", channel.mnemonic(), enabled);
        self.send("channel_display", &[channel.into(), enabled.into()])
    }

    pub fn channel_coupling(&self, channel: Channel) -> Result<Coupling, ScopeError> {
        self.query_parsed("channel_coupling_query", &[channel.into()])
    }

    pub fn set_channel_coupling(&self, channel: Channel, coupling: Coupling) -> Result<(), ScopeError> {
        self.send(
            "channel_coupling",
            &[channel.into(), coupling.mnemonic().into()],
        )
    }

    /// Vertical scale in volts per division.
    pub fn channel_scale(&self, channel: Channel) -> Result<f64, ScopeError> {
        self.query_f64("channel_scale_query", &[channel.into()])
    }

    pub fn set_channel_scale(&self, channel: Channel, volts_per_div: f64) -> Result<(), ScopeError> {
        if !(volts_per_div.is_finite() && volts_per_div > 0.0) {
            return Err(ScopeError::InvalidArgument(format!(
                "vertical scale must be positive, got {volts_per_div}"
            )));
        }
        self.send("channel_scale", &[channel.into(), volts_per_div.into()])
    }

    pub fn channel_offset(&self, channel: Channel) -> Result<f64, ScopeError> {
        self.query_f64("channel_offset_query", &[channel.into()])
    }

    pub fn set_channel_offset(&self, channel: Channel, volts: f64) -> Result<(), ScopeError> {
        if !volts.is_finite() {
            return Err(ScopeError::InvalidArgument(format!(
                "offset must be finite, got {volts}"
            )));
        }
        self.send("channel_offset", &[channel.into(), volts.into()])
    }

    /// Probe attenuation ratio, e.g. 10 for a 10:1 probe.
    pub fn channel_probe(&self, channel: Channel) -> Result<f64, ScopeError> {
        self.query_f64("channel_probe_query", &[channel.into()])
    }

    pub fn set_channel_probe(&self, channel: Channel, ratio: f64) -> Result<(), ScopeError> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(ScopeError::InvalidArgument(format!(
                "probe ratio must be positive, got {ratio}"
            )));
        }
        self.send("channel_probe", &[channel.into(), ratio.into()])
    }

    /// Set the bandwidth limit, one of [`BANDWIDTH_LIMITS`].
    pub fn set_channel_bandwidth(&self, channel: Channel, limit: &str) -> Result<(), ScopeError> {
        let limit = limit.to_ascii_uppercase();
        if !BANDWIDTH_LIMITS.contains(&limit.as_str()) {
            return Err(ScopeError::InvalidArgument(format!(
                "bandwidth limit must be one of {BANDWIDTH_LIMITS:?}, got '{limit}'"
            )));
        }
        self.send("channel_bandwidth", &[channel.into(), Arg::Word(limit)])
    }
}

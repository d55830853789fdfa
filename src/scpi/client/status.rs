//! Instrument status: the SCPI error queue and operation-complete polling.
//!
//! Error-queue entries are advisory. A command that the instrument rejected
//! still returns `Ok` from [`ScopeClient::execute`]; callers that care drain
//! the queue afterwards and decide themselves whether to escalate with
//! [`ErrorEntry::into_error`].

use std::time::Duration;

use log::warn;
use serde::Serialize;

use super::ScopeClient;
use crate::error::ScopeError;
use crate::types::{Channel, Coupling, ErrorEntry, Identity};
use crate::utils::{poll_until, PollError};

/// Upper bound on entries popped by one [`ScopeClient::drain_errors`] call.
pub const MAX_ERROR_DRAIN: usize = 50;

/// Vertical settings of one channel. A setting whose reply could not be parsed is `None`.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub coupling: Option<Coupling>,
}

/// Snapshot of the instrument state, as printed by `scope-cli info`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub identity: Identity,
    pub trigger_status: String,
    pub timebase_scale: f64,
    pub timebase_offset: f64,
    pub channels: Vec<ChannelStatus>,
    pub errors: Vec<ErrorEntry>,
}

impl ScopeClient {
    /// Pop one entry from the error queue. `None` means the queue is empty.
    pub fn last_error(&self) -> Result<Option<ErrorEntry>, ScopeError> {
        let reply = self.query("error_query", &[])?;
        ErrorEntry::parse(&reply)
    }

    /// Pop entries until the queue reports "no error", oldest first.
    ///
    /// Stops after [`MAX_ERROR_DRAIN`] entries even if the instrument keeps
    /// reporting errors.
    pub fn drain_errors(&self) -> Result<Vec<ErrorEntry>, ScopeError> {
        let mut errors = Vec::new();

        while errors.len() < MAX_ERROR_DRAIN {
            match self.last_error()? {
                Some(entry) => {
                    warn!("Instrument error {entry}");
                    errors.push(entry);
                }
                None => return Ok(errors),
            }
        }

        warn!("Error queue still not empty after {MAX_ERROR_DRAIN} entries");
        Ok(errors)
    }

    /// Clear the status registers and the error queue.
    pub fn clear_status(&self) -> Result<(), ScopeError> {
        self.send("clear_status", &[])
    }

    /// Poll `*OPC?` until the instrument reports that pending operations have finished.
    ///
    /// `timeout` bounds the whole wait; each poll still uses the session read
    /// timeout. The query is issued at least once, so `Duration::ZERO` performs
    /// a single check. Fails with [`ScopeError::LinkTimeout`] when the deadline passes.
    pub fn wait_operation_complete(&self, timeout: Duration) -> Result<(), ScopeError> {
        let interval = self.config().opc_poll_interval;

        poll_until(
            || {
                let reply = self.query("operation_complete", &[])?;
                Ok(reply.trim() == "1")
            },
            timeout,
            interval,
        )
        .map_err(|e| match e {
            PollError::Timeout => {
                warn!("Operation still pending after {timeout:?}");
                ScopeError::LinkTimeout {
                    command: "*OPC?".to_string(),
                }
            }
            PollError::ConditionError(e) => e,
        })
    }

    /// Collect identity, trigger, timebase and per-channel settings, then drain the error queue.
    pub fn system_status(&self) -> Result<SystemStatus, ScopeError> {
        let identity = self.identity()?;
        let trigger_status = self.trigger_status()?;
        let timebase_scale = self.timebase_scale()?;
        let timebase_offset = self.timebase_offset()?;

        let channels = Channel::all()
            .map(|channel| {
                Ok(ChannelStatus {
                    channel,
                    scale: unless_malformed(self.channel_scale(channel))?,
                    offset: unless_malformed(self.channel_offset(channel))?,
                    coupling: unless_malformed(self.channel_coupling(channel))?,
                })
            })
            .collect::<Result<Vec<_>, ScopeError>>()?;

        Ok(SystemStatus {
            identity,
            trigger_status,
            timebase_scale,
            timebase_offset,
            channels,
            errors: self.drain_errors()?,
        })
    }
}

/// Turn a malformed reply into `None`; link errors pass through.
fn unless_malformed<T>(result: Result<T, ScopeError>) -> Result<Option<T>, ScopeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ScopeError::MalformedReply { command, reason, .. }) => {
            warn!("Ignoring reply to '{command}': {reason}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

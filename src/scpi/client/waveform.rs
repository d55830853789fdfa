use std::time::Duration;

use log::{debug, info};

use super::ScopeClient;
use crate::error::ScopeError;
use crate::types::{Arg, WaveformSource};
use crate::waveform::{decode_waveform, WaveformFormat, WaveformRecord};

/// Lower bound on the read timeout for a display capture; rendering the image
/// takes the instrument several seconds.
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(17);

const PNG_SIGNATURE: &[u8] = b"\x89PNG";

/// What to transfer in [`ScopeClient::capture_waveform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub source: WaveformSource,
    pub format: WaveformFormat,
    /// Limit the transfer to the first `n` points; `None` transfers the screen record
    pub points: Option<u32>,
}

impl CaptureRequest {
    pub fn new(source: impl Into<WaveformSource>) -> Self {
        Self {
            source: source.into(),
            format: WaveformFormat::Byte,
            points: None,
        }
    }

    pub fn format(mut self, format: WaveformFormat) -> Self {
        self.format = format;
        self
    }

    pub fn points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }
}

impl ScopeClient {
    /// Select source and format, then read the preamble and the data block and decode them.
    ///
    /// Each step is its own transaction; another thread sharing the client may
    /// interleave commands between them.
    pub fn capture_waveform(&self, request: CaptureRequest) -> Result<WaveformRecord, ScopeError> {
        if request.points == Some(0) {
            return Err(ScopeError::InvalidArgument(
                "point count must be at least 1".to_string(),
            ));
        }

        debug!(
            "Capturing {} as {}",
            request.source.mnemonic(),
            request.format.mnemonic()
        );
        self.send("waveform_source", &[request.source.mnemonic().into()])?;
        self.send("waveform_mode", &["NORM".into()])?;
        self.send("waveform_format", &[request.format.mnemonic().into()])?;
        if let Some(points) = request.points {
            self.send("waveform_start", &[Arg::Int(1)])?;
            self.send("waveform_stop", &[points.into()])?;
        }

        let preamble = self.query("waveform_preamble", &[])?;
        let block = self.query_block("waveform_data", &[])?;
        let record = decode_waveform(&block, &preamble)?;

        info!(
            "Captured {} samples from {}",
            record.len(),
            request.source.mnemonic()
        );
        Ok(record)
    }

    /// Capture the display as an image (PNG on the DHO900 series).
    ///
    /// Bytes ahead of the PNG signature are dropped; payloads without a
    /// signature are returned unchanged.
    pub fn screenshot(&self) -> Result<Vec<u8>, ScopeError> {
        let timeout = self.config().timeout.max(SCREENSHOT_TIMEOUT);
        let image = self
            .execute("display_data", &[], Some(timeout))?
            .into_block()
            .unwrap_or_default();

        if image.is_empty() {
            return Err(ScopeError::malformed("DISP:DATA?", "empty image", &[]));
        }

        let image = match image
            .windows(PNG_SIGNATURE.len())
            .position(|window| window == PNG_SIGNATURE)
        {
            Some(0) | None => image,
            Some(start) => image[start..].to_vec(),
        };

        info!("Captured {} byte screenshot", image.len());
        Ok(image)
    }
}

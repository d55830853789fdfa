//! Waveform preamble parsing and raw sample decoding.
//!
//! `WAV:PRE?` returns ten comma-separated fields:
//! `format,type,points,count,xincrement,xorigin,xreference,yincrement,yorigin,yreference`.
//! `WAV:DATA?` returns the samples as a binary block whose payload is decoded
//! here according to the preamble's format.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::ScopeError;

const PREAMBLE_FIELDS: usize = 10;
const PREAMBLE_COMMAND: &str = "WAV:PRE?";
const DATA_COMMAND: &str = "WAV:DATA?";

/// Sample encoding of a waveform transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaveformFormat {
    /// One unsigned octet per sample
    Byte,
    /// One unsigned 16-bit little-endian word per sample
    Word,
    /// Comma-separated decimal values, already in volts
    Ascii,
}

impl WaveformFormat {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(WaveformFormat::Byte),
            1 => Some(WaveformFormat::Word),
            2 => Some(WaveformFormat::Ascii),
            _ => None,
        }
    }

    /// Bytes per sample, `None` for text.
    pub fn sample_width(self) -> Option<usize> {
        match self {
            WaveformFormat::Byte => Some(1),
            WaveformFormat::Word => Some(2),
            WaveformFormat::Ascii => None,
        }
    }

    /// Argument for `WAV:FORM`.
    pub fn mnemonic(self) -> &'static str {
        match self {
            WaveformFormat::Byte => "BYTE",
            WaveformFormat::Word => "WORD",
            WaveformFormat::Ascii => "ASC",
        }
    }
}

impl std::str::FromStr for WaveformFormat {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BYTE" => Ok(WaveformFormat::Byte),
            "WORD" => Ok(WaveformFormat::Word),
            "ASC" | "ASCII" => Ok(WaveformFormat::Ascii),
            other => Err(ScopeError::InvalidArgument(format!(
                "Waveform format must be BYTE, WORD or ASC, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionType {
    Normal,
    Peak,
    Average,
    HighResolution,
    Other(u64),
}

impl From<u64> for AcquisitionType {
    fn from(code: u64) -> Self {
        match code {
            0 => AcquisitionType::Normal,
            1 => AcquisitionType::Peak,
            2 => AcquisitionType::Average,
            3 => AcquisitionType::HighResolution,
            other => AcquisitionType::Other(other),
        }
    }
}

/// Scaling metadata for one waveform transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformPreamble {
    pub format: WaveformFormat,
    pub acquisition_type: AcquisitionType,
    pub points: u64,
    pub count: u64,
    pub x_increment: f64,
    pub x_origin: f64,
    /// Trigger-aligned sample index; not applied to the decoded time axis
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

fn preamble_error(reason: String, text: &str) -> ScopeError {
    ScopeError::malformed(PREAMBLE_COMMAND, reason, text.as_bytes())
}

fn parse_float(field: &str, name: &str, text: &str) -> Result<f64, ScopeError> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| preamble_error(format!("{name} is not a number: '{field}'"), text))
}

/// Integer fields are sometimes sent in exponent notation (`1.000000e+03`).
fn parse_count(field: &str, name: &str, text: &str) -> Result<u64, ScopeError> {
    if let Ok(value) = field.parse::<u64>() {
        return Ok(value);
    }
    let value = parse_float(field, name, text)?;
    if value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(preamble_error(
            format!("{name} must be a non-negative integer, got '{field}'"),
            text,
        ));
    }
    Ok(value as u64)
}

impl WaveformPreamble {
    pub fn parse(text: &str) -> Result<Self, ScopeError> {
        let fields: Vec<&str> = text.trim().split(',').map(str::trim).collect();
        if fields.len() != PREAMBLE_FIELDS {
            return Err(preamble_error(
                format!("expected {PREAMBLE_FIELDS} fields, got {}", fields.len()),
                text,
            ));
        }

        let format_code = parse_count(fields[0], "format", text)?;
        let format = WaveformFormat::from_code(format_code)
            .ok_or_else(|| preamble_error(format!("unknown format code {format_code}"), text))?;

        let preamble = Self {
            format,
            acquisition_type: parse_count(fields[1], "type", text)?.into(),
            points: parse_count(fields[2], "points", text)?,
            count: parse_count(fields[3], "count", text)?,
            x_increment: parse_float(fields[4], "x increment", text)?,
            x_origin: parse_float(fields[5], "x origin", text)?,
            x_reference: parse_float(fields[6], "x reference", text)?,
            y_increment: parse_float(fields[7], "y increment", text)?,
            y_origin: parse_float(fields[8], "y origin", text)?,
            y_reference: parse_float(fields[9], "y reference", text)?,
        };

        if format != WaveformFormat::Ascii
            && (preamble.x_increment == 0.0 || preamble.y_increment == 0.0)
        {
            return Err(preamble_error(
                "x and y increments must be non-zero for binary formats".to_string(),
                text,
            ));
        }

        Ok(preamble)
    }

    /// Time of sample `index`, in seconds.
    pub fn time_at(&self, index: usize) -> f64 {
        self.x_origin + index as f64 * self.x_increment
    }

    /// Voltage of a raw sample code.
    pub fn voltage_of(&self, code: f64) -> f64 {
        (code - self.y_reference - self.y_origin) * self.y_increment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveformSample {
    pub time: f64,
    pub voltage: f64,
}

/// Decoded waveform: one (time, voltage) pair per sample in the data block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformRecord {
    preamble: WaveformPreamble,
    samples: Vec<WaveformSample>,
}

impl WaveformRecord {
    pub fn preamble(&self) -> &WaveformPreamble {
        &self.preamble
    }

    pub fn samples(&self) -> &[WaveformSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.time)
    }

    pub fn voltages(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.voltage)
    }
}

fn decode_codes(raw: &[u8], format: WaveformFormat, width: usize) -> Result<Vec<f64>, ScopeError> {
    if raw.len() % width != 0 {
        return Err(ScopeError::malformed(
            DATA_COMMAND,
            format!(
                "{} data length {} is not a multiple of {width}",
                format.mnemonic(),
                raw.len()
            ),
            raw,
        ));
    }

    Ok(match format {
        WaveformFormat::Word => raw
            .chunks_exact(2)
            .map(|word| LittleEndian::read_u16(word) as f64)
            .collect(),
        _ => raw.iter().map(|&byte| byte as f64).collect(),
    })
}

fn decode_ascii(raw: &[u8]) -> Result<Vec<f64>, ScopeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ScopeError::malformed(DATA_COMMAND, "ASCII data is not valid UTF-8", raw))?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == ',');
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| {
                ScopeError::malformed(DATA_COMMAND, format!("'{field}' is not a number"), raw)
            })
        })
        .collect()
}

/// Decode a waveform data block payload using the preamble reply text.
pub fn decode_waveform(raw_block: &[u8], preamble_text: &str) -> Result<WaveformRecord, ScopeError> {
    let preamble = WaveformPreamble::parse(preamble_text)?;
    decode_with_preamble(raw_block, preamble)
}

/// Decode a waveform data block payload against an already parsed preamble.
pub fn decode_with_preamble(
    raw_block: &[u8],
    preamble: WaveformPreamble,
) -> Result<WaveformRecord, ScopeError> {
    let voltages: Vec<f64> = match preamble.format.sample_width() {
        Some(width) => decode_codes(raw_block, preamble.format, width)?
            .into_iter()
            .map(|code| preamble.voltage_of(code))
            .collect(),
        None => decode_ascii(raw_block)?,
    };

    let samples = voltages
        .into_iter()
        .enumerate()
        .map(|(i, voltage)| WaveformSample {
            time: preamble.time_at(i),
            voltage,
        })
        .collect();

    Ok(WaveformRecord { preamble, samples })
}

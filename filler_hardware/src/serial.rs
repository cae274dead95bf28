//! Line-oriented scale protocol.
//!
//! Serial bench scales stream one reading per line, e.g. `WT:+012.34 LBS`.
//! `LineScale` reads such lines from any `BufRead` (a tty opened as a file,
//! a pipe, a test buffer) and hands back the value.

use std::io::{BufRead, ErrorKind};

use filler_traits::{BoxError, WeightSensor};

use crate::error::{HwError, Result};

/// Readings outside this window are rejected by the scale binding itself.
pub const SENSOR_MIN: f32 = -10.0;
pub const SENSOR_MAX: f32 = 500.0;

const MAX_RETRIES: u32 = 3;

/// Extract the weight from one scale line.
///
/// Anything before the first sign or digit is skipped; the number ends at the
/// first character that cannot continue it.
pub fn parse_weight_line(line: &str) -> Result<f32> {
    let start = line
        .find(|c: char| c == '+' || c == '-' || c.is_ascii_digit())
        .ok_or_else(|| HwError::Io(std::io::Error::new(ErrorKind::InvalidData, "no number in scale line")))?;
    let rest = &line[start..];
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map_or(rest.len(), |(i, _)| i);
    let value: f32 = rest[..end].parse().map_err(|_| {
        HwError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("unparsable scale line: {}", line.trim_end()),
        ))
    })?;
    if !(SENSOR_MIN..=SENSOR_MAX).contains(&value) {
        return Err(HwError::OutOfRange(value));
    }
    Ok(value)
}

/// `WeightSensor` over a stream of scale lines.
#[derive(Debug)]
pub struct LineScale<R> {
    reader: R,
    line: String,
}

impl<R: BufRead> LineScale<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }

    fn next_line(&mut self) -> Result<()> {
        let mut attempts = 0;
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Err(HwError::Disconnected),
                Ok(_) => return Ok(()),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    if attempts >= MAX_RETRIES {
                        return Err(HwError::Timeout);
                    }
                    attempts += 1;
                    tracing::warn!(retries = attempts, "scale timeout, retrying");
                }
                Err(e) => return Err(HwError::Io(e)),
            }
        }
    }

    /// Read the next line and parse it.
    pub fn read_weight(&mut self) -> Result<f32> {
        self.next_line()?;
        let w = parse_weight_line(&self.line);
        if let Err(e) = &w {
            tracing::warn!(error = %e, "bad scale line");
        }
        w
    }
}

impl<R: BufRead> WeightSensor for LineScale<R> {
    fn read(&mut self) -> std::result::Result<f32, BoxError> {
        Ok(self.read_weight()?)
    }
}

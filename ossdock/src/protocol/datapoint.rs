//! Datapoint rows as logged and returned by the device.
//!
//! ```text
//! DATE,TIME,MANUAL,INT_TIME,FRAME_AVG,AE,SATURATED,DARK,X,Y,Z,<340nm>,...,<1010nm>,
//! ```
//!
//! The spectrum values are carried as-is; no colorimetry happens here.

use crate::error::{Error, Result};
use crate::protocol::{wavelength_bin_count, wavelengths};
use std::fmt::Write as _;

/// Fixed columns before the spectrum.
const FIXED_COLUMNS: [&str; 11] = [
    "DATE",
    "TIME",
    "MANUAL",
    "INT_TIME",
    "FRAME_AVG",
    "AE",
    "IS_SATURATED",
    "IS_DARK",
    "X",
    "Y",
    "Z",
];

/// One captured reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Datapoint {
    /// Date column, as sent by the device.
    pub date: String,
    /// Time column, as sent by the device.
    pub time: String,
    /// Captured on request rather than by the logging schedule.
    pub manual: bool,
    /// Integration time in ms.
    pub integration_time: u32,
    /// Number of frames averaged.
    pub frame_avg: u32,
    /// Auto-exposure was enabled.
    pub auto_exposure: bool,
    /// The sensor saturated.
    pub saturated: bool,
    /// The reading was too dark to be useful.
    pub dark: bool,
    /// CIE 1931 X.
    pub x: f64,
    /// CIE 1931 Y.
    pub y: f64,
    /// CIE 1931 Z.
    pub z: f64,
    /// One power value per wavelength bin.
    pub spectrum: Vec<f64>,
}

impl Datapoint {
    /// Parse a comma-separated row. A trailing comma is allowed.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let mut tokens: Vec<&str> = line
            .split(',')
            .map(str::trim)
            .collect();
        if tokens.last() == Some(&"") {
            tokens.pop();
        }

        let expected = FIXED_COLUMNS.len() + wavelength_bin_count();
        if tokens.len() != expected {
            return Err(Error::Protocol(format!(
                "datapoint row has {} columns, expected {expected}",
                tokens.len()
            )));
        }

        let spectrum = tokens[FIXED_COLUMNS.len()..]
            .iter()
            .enumerate()
            .map(|(i, t)| parse_number(t, i + FIXED_COLUMNS.len()))
            .collect::<Result<Vec<f64>>>()?;

        Ok(Self {
            date: tokens[0].to_string(),
            time: tokens[1].to_string(),
            manual: parse_flag(tokens[2], 2)?,
            integration_time: parse_int(tokens[3], 3)?,
            frame_avg: parse_int(tokens[4], 4)?,
            auto_exposure: parse_flag(tokens[5], 5)?,
            saturated: parse_flag(tokens[6], 6)?,
            dark: parse_flag(tokens[7], 7)?,
            x: parse_number(tokens[8], 8)?,
            y: parse_number(tokens[9], 9)?,
            z: parse_number(tokens[10], 10)?,
            spectrum,
        })
    }

    /// `DATE TIME` as one string.
    pub fn timestamp(&self) -> String {
        format!("{} {}", self.date, self.time)
    }

    /// `(wavelength nm, value)` pairs.
    pub fn bins(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        wavelengths().zip(
            self.spectrum
                .iter()
                .copied(),
        )
    }

    /// Header line of the device log file, newline included.
    pub fn csv_header() -> String {
        let mut line = String::new();
        for column in FIXED_COLUMNS {
            line.push_str(column);
            line.push(',');
        }
        for nm in wavelengths() {
            let _ = write!(line, "{nm},");
        }
        line.push('\n');
        line
    }
}

fn column_name(index: usize) -> String {
    FIXED_COLUMNS
        .get(index)
        .map_or_else(|| format!("column {}", index + 1), |c| (*c).to_string())
}

fn parse_flag(token: &str, index: usize) -> Result<bool> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(Error::Protocol(format!(
            "{}: expected 0 or 1, got {token:?}",
            column_name(index)
        ))),
    }
}

fn parse_int(token: &str, index: usize) -> Result<u32> {
    token
        .parse()
        .map_err(|_| Error::Protocol(format!("{}: not an integer: {token:?}", column_name(index))))
}

fn parse_number(token: &str, index: usize) -> Result<f64> {
    token
        .parse()
        .map_err(|_| Error::Protocol(format!("{}: not a number: {token:?}", column_name(index))))
}

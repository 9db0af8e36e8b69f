//! Opcode table and request line codec.
//!
//! The opcode table is the wire source of truth. Whether a command is meant
//! for end users or used internally (handshake, clock sync, session control)
//! is an explicit flag on each entry.

use crate::{
    error::{Error, Result},
    protocol::settings::{
        NspSettings, normalize_device_name, validate_calibration_factor, validate_logging_interval,
    },
};
use std::{fmt, str::FromStr};

/// Digits in the packed clock parameter, `YYYYMMDDhhmmss`.
const CLOCK_DIGITS: usize = 14;

/// Separator between the opcode and its parameters.
pub const PARAM_SEPARATOR: char = '_';

/// How parameters are appended to the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `<opcode>_<param>_<param>`
    Joined,
    /// `<opcode><param>`; the firmware reads fixed-width fields.
    Packed,
}

/// Device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Flip between recording and paused (00).
    ToggleDataCapture,
    /// Capture one datapoint now and return it (01).
    ManualCapture,
    /// Stream the whole log file (02).
    ExportAll,
    /// Restore factory settings (03).
    ResetDevice,
    /// Set the logging interval in ms (04).
    SetCollectionInterval,
    /// Set the device clock, `YYYYMMDDhhmmss` (05).
    SetDatetime,
    /// Handshake; answers with the structured status block (07).
    SayHello,
    /// Set the device name (08).
    SetDeviceName,
    /// Free-form device information (09).
    GetInfo,
    /// Sensor exposure settings (10).
    NspSettings,
    /// Set the sensor calibration factor (11).
    SetCalibrationFactor,
    /// Start recording (12).
    StartRecording,
    /// Stop recording (13).
    StopRecording,
    /// Delete the log file (14).
    EraseStorage,
    /// Stream only the bytes not yet synced (15).
    SyncDatapoints,
    /// Schedule a recording start (17).
    SetStartTime,
    /// Schedule a recording stop (18).
    SetStopTime,
}

#[derive(Clone, Copy)]
struct OpcodeInfo {
    code: &'static str,
    name: &'static str,
    internal: bool,
    params: usize,
    style: ParamStyle,
    mutates: bool,
}

const fn entry(
    code: &'static str,
    name: &'static str,
    internal: bool,
    params: usize,
    style: ParamStyle,
    mutates: bool,
) -> OpcodeInfo {
    OpcodeInfo {
        code,
        name,
        internal,
        params,
        style,
        mutates,
    }
}

use ParamStyle::{Joined, Packed};

impl Opcode {
    const ALL: [Self; 17] = [
        Self::ToggleDataCapture,
        Self::ManualCapture,
        Self::ExportAll,
        Self::ResetDevice,
        Self::SetCollectionInterval,
        Self::SetDatetime,
        Self::SayHello,
        Self::SetDeviceName,
        Self::GetInfo,
        Self::NspSettings,
        Self::SetCalibrationFactor,
        Self::StartRecording,
        Self::StopRecording,
        Self::EraseStorage,
        Self::SyncDatapoints,
        Self::SetStartTime,
        Self::SetStopTime,
    ];

    #[rustfmt::skip]
    fn info(self) -> OpcodeInfo {
        match self {
            Self::ToggleDataCapture     => entry("00", "TOGGLE_DATA_CAPTURE",     false, 0, Joined, true),
            Self::ManualCapture         => entry("01", "MANUAL_CAPTURE",          false, 0, Joined, true),
            Self::ExportAll             => entry("02", "EXPORT_ALL",              false, 0, Joined, false),
            Self::ResetDevice           => entry("03", "RESET_DEVICE",            false, 0, Joined, true),
            Self::SetCollectionInterval => entry("04", "SET_COLLECTION_INTERVAL", false, 1, Joined, true),
            Self::SetDatetime           => entry("05", "SET_DATETIME",            true,  1, Packed, false),
            Self::SayHello              => entry("07", "SAY_HELLO",               true,  0, Joined, false),
            Self::SetDeviceName         => entry("08", "SET_DEVICE_NAME",         false, 1, Joined, true),
            Self::GetInfo               => entry("09", "GET_INFO",                true,  0, Joined, false),
            Self::NspSettings           => entry("10", "NSP_SETTINGS",            true,  1, Packed, false),
            Self::SetCalibrationFactor  => entry("11", "SET_CALIBRATION_FACTOR",  false, 1, Joined, false),
            Self::StartRecording        => entry("12", "START_RECORDING",         true,  0, Joined, true),
            Self::StopRecording         => entry("13", "STOP_RECORDING",          true,  0, Joined, true),
            Self::EraseStorage          => entry("14", "ERASE_STORAGE",           false, 0, Joined, true),
            Self::SyncDatapoints        => entry("15", "SYNC_DATAPOINTS",         true,  1, Joined, false),
            Self::SetStartTime          => entry("17", "SET_START_TIME",          true,  1, Joined, true),
            Self::SetStopTime           => entry("18", "SET_STOP_TIME",           true,  1, Joined, true),
        }
    }

    /// All opcodes in wire code order.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter()
    }

    /// Opcodes meant to be offered to users.
    pub fn public() -> impl Iterator<Item = Self> {
        Self::all().filter(|op| !op.is_internal())
    }

    /// Two-digit wire code.
    pub fn code(self) -> &'static str {
        self.info().code
    }

    /// Canonical upper-case name.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Whether the command is used by the engine itself rather than users.
    pub fn is_internal(self) -> bool {
        self.info().internal
    }

    /// Exact number of parameters the command takes.
    pub fn param_count(self) -> usize {
        self.info().params
    }

    /// How parameters are placed on the wire.
    pub fn param_style(self) -> ParamStyle {
        self.info().style
    }

    /// Whether the command can change recording status, interval or counter.
    pub fn mutates_state(self) -> bool {
        self.info().mutates
    }

    /// Look up an opcode by name, case-insensitively.
    ///
    /// The leading `_` marker used for internal commands is optional.
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name
            .trim()
            .trim_start_matches(PARAM_SEPARATOR);
        Self::all()
            .find(|op| op.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }

    /// Look up an opcode by its two-digit wire code.
    pub fn from_code(code: &str) -> Result<Self> {
        Self::all()
            .find(|op| op.code() == code)
            .ok_or_else(|| Error::UnknownCommand(code.to_string()))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request: opcode plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    params: Vec<String>,
}

impl Command {
    /// Build a command, checking the parameter count and content.
    ///
    /// Parameters may not contain line terminators, and only the last one may
    /// contain the `_` separator. Settings are held to the device limits and
    /// device names are normalized; see [`normalize_device_name`].
    pub fn new<I, S>(opcode: Opcode, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut params: Vec<String> = params
            .into_iter()
            .map(Into::into)
            .collect();

        if params.len() != opcode.param_count() {
            return Err(Error::InvalidArgument(format!(
                "{opcode} takes {} parameter(s), got {}",
                opcode.param_count(),
                params.len()
            )));
        }

        for (i, param) in params
            .iter()
            .enumerate()
        {
            if param.contains(['\r', '\n']) {
                return Err(Error::InvalidArgument(format!(
                    "{opcode} parameter {} contains a line break",
                    i + 1
                )));
            }
            if i + 1 < params.len() && param.contains(PARAM_SEPARATOR) {
                return Err(Error::InvalidArgument(format!(
                    "{opcode} parameter {} contains '{PARAM_SEPARATOR}'",
                    i + 1
                )));
            }
        }

        if let [param] = params.as_mut_slice() {
            *param = check_param(opcode, std::mem::take(param))?;
        }

        Ok(Self { opcode, params })
    }

    /// A command without parameters.
    pub fn bare(opcode: Opcode) -> Result<Self> {
        Self::new(opcode, std::iter::empty::<String>())
    }

    /// The opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The parameters, in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Encode into a wire line without the terminator.
    pub fn encode(&self) -> String {
        let mut line = String::from(self.opcode.code());
        match self
            .opcode
            .param_style()
        {
            ParamStyle::Joined => {
                for param in &self.params {
                    line.push(PARAM_SEPARATOR);
                    line.push_str(param);
                }
            },
            ParamStyle::Packed => {
                for param in &self.params {
                    line.push_str(param);
                }
            },
        }
        line
    }

    /// Decode a wire line produced by [`Command::encode`].
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (code, rest) = line
            .split_at_checked(2)
            .ok_or_else(|| Error::Protocol(format!("request line too short: {line:?}")))?;
        let opcode = Opcode::from_code(code)?;

        let params: Vec<String> = match opcode.param_style() {
            _ if opcode.param_count() == 0 => {
                if !rest.is_empty() {
                    return Err(Error::Protocol(format!(
                        "{opcode} takes no parameters: {line:?}"
                    )));
                }
                Vec::new()
            },
            ParamStyle::Joined => {
                let rest = rest
                    .strip_prefix(PARAM_SEPARATOR)
                    .ok_or_else(|| {
                        Error::Protocol(format!("missing parameters for {opcode}: {line:?}"))
                    })?;
                rest.splitn(opcode.param_count(), PARAM_SEPARATOR)
                    .map(str::to_string)
                    .collect()
            },
            ParamStyle::Packed => vec![rest.to_string()],
        };

        Self::new(opcode, params).map_err(|e| Error::Protocol(e.to_string()))
    }
}

/// Per-opcode checks on a single parameter; returns it as it will be sent.
fn check_param(opcode: Opcode, param: String) -> Result<String> {
    match opcode {
        Opcode::SetDeviceName => normalize_device_name(&param),
        Opcode::SetCollectionInterval => {
            validate_logging_interval(parse_number(opcode, &param)?)?;
            Ok(param)
        },
        Opcode::SetCalibrationFactor => {
            validate_calibration_factor(parse_number(opcode, &param)?)?;
            Ok(param)
        },
        Opcode::SetDatetime => {
            if param.len() != CLOCK_DIGITS || !param.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::InvalidArgument(format!(
                    "{opcode} takes {CLOCK_DIGITS} digits (YYYYMMDDhhmmss), got {param:?}"
                )));
            }
            Ok(param)
        },
        Opcode::NspSettings => {
            NspSettings::parse(&param)?;
            Ok(param)
        },
        Opcode::SyncDatapoints => {
            parse_number::<u64>(opcode, &param)?;
            Ok(param)
        },
        _ => Ok(param),
    }
}

fn parse_number<T: FromStr>(opcode: Opcode, param: &str) -> Result<T> {
    param
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("{opcode} takes a number, got {param:?}")))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_is_consistent() {
        let mut codes: Vec<&str> = Opcode::all()
            .map(Opcode::code)
            .collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total, "wire codes must be unique");

        for op in Opcode::all() {
            assert_eq!(op.code().len(), 2);
            assert!(op.code().bytes().all(|b| b.is_ascii_digit()));
            assert_eq!(Opcode::from_code(op.code()).ok(), Some(op));
            assert_eq!(Opcode::from_name(op.name()).ok(), Some(op));
        }
    }

    #[test]
    fn test_public_internal_partition() {
        let public: Vec<Opcode> = Opcode::public().collect();
        assert!(public.contains(&Opcode::ExportAll));
        assert!(public.contains(&Opcode::SetDeviceName));
        assert!(!public.contains(&Opcode::SayHello));
        assert!(!public.contains(&Opcode::SetDatetime));
        assert!(Opcode::SyncDatapoints.is_internal());
    }

    #[test]
    fn test_from_name_accepts_internal_marker() {
        assert_eq!(Opcode::from_name("_SAY_HELLO").ok(), Some(Opcode::SayHello));
        assert_eq!(Opcode::from_name("say_hello").ok(), Some(Opcode::SayHello));
        assert!(matches!(
            Opcode::from_name("SELF_DESTRUCT"),
            Err(Error::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_encode_set_device_name() {
        let cmd = Command::new(Opcode::SetDeviceName, ["Lab1"]).unwrap();
        assert_eq!(cmd.encode(), "08_Lab1");
    }

    #[test]
    fn test_encode_packed_parameters() {
        let cmd = Command::new(Opcode::SetDatetime, ["20240131235959"]).unwrap();
        assert_eq!(cmd.encode(), "0520240131235959");

        let cmd = Command::new(Opcode::NspSettings, ["10030500"]).unwrap();
        assert_eq!(cmd.encode(), "1010030500");
    }

    #[test]
    fn test_encode_bare() {
        assert_eq!(Command::bare(Opcode::SayHello).unwrap().encode(), "07");
        assert_eq!(Command::bare(Opcode::ExportAll).unwrap().encode(), "02");
    }

    #[test]
    fn test_param_count_enforced() {
        assert!(matches!(
            Command::bare(Opcode::SetDeviceName),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Command::new(Opcode::ExportAll, ["x"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_line_break_rejected() {
        assert!(matches!(
            Command::new(Opcode::SetDeviceName, ["a\nb"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    fn sample_param(op: Opcode) -> &'static str {
        match op {
            Opcode::SetCollectionInterval => "60000",
            Opcode::SetDatetime => "20240101000000",
            Opcode::SetDeviceName => "Lab_1",
            Opcode::NspSettings => "10030500",
            Opcode::SetCalibrationFactor => "1.25",
            Opcode::SyncDatapoints => "0",
            _ => "x",
        }
    }

    #[test]
    fn test_decode_recovers_every_opcode() {
        for op in Opcode::all() {
            let params: Vec<&str> = if op.param_count() == 0 {
                Vec::new()
            } else {
                vec![sample_param(op)]
            };
            let cmd = Command::new(op, params.clone()).unwrap();
            let decoded = Command::decode(&cmd.encode()).unwrap();
            assert_eq!(decoded.opcode(), op);
            assert_eq!(decoded.params(), params.as_slice());
        }
    }

    #[test]
    fn test_device_limits_enforced_for_every_caller() {
        for (op, param) in [
            (Opcode::SetDeviceName, "ThisNameIsTooLong"),
            (Opcode::SetDeviceName, "Lab\t1"),
            (Opcode::SetCollectionInterval, "5000"),
            (Opcode::SetCollectionInterval, "hourly"),
            (Opcode::SetCalibrationFactor, "NaN"),
            (Opcode::SetCalibrationFactor, "strong"),
            (Opcode::SetDatetime, "2024-01-31"),
            (Opcode::SetDatetime, "202401311200"),
            (Opcode::NspSettings, "1030500"),
            (Opcode::NspSettings, "10110500"),
            (Opcode::SyncDatapoints, "-1"),
        ] {
            assert!(
                matches!(Command::new(op, [param]), Err(Error::InvalidArgument(_))),
                "{op} {param:?}"
            );
        }
    }

    #[test]
    fn test_device_name_normalized() {
        let cmd = Command::new(Opcode::SetDeviceName, ["  Lab 1 "]).unwrap();
        assert_eq!(cmd.encode(), "08_Lab_1");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Command::decode("7").is_err());
        assert!(Command::decode("99_x").is_err());
        assert!(Command::decode("07_extra").is_err());
        assert!(Command::decode("08").is_err());
    }
}

//! Shared types, error enum, and the decoded message record for skyfeed-core.

use serde::Serialize;
use thiserror::Error;

/// All errors produced by skyfeed-core.
///
/// Steady-state decode failures are not errors: an invalid frame is simply a
/// `ModesMessage` with `crc_ok == false`, and a failed position decode leaves
/// the prior fix in place. The variants below only occur around startup and
/// shutdown of the surrounding process.
#[derive(Debug, Error)]
pub enum SkyfeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("uploader error: {0}")]
    Uploader(String),
}

pub type Result<T> = std::result::Result<T, SkyfeedError>;

// ---------------------------------------------------------------------------
// Message constants
// ---------------------------------------------------------------------------

/// Longest Mode S frame in bytes (112 bits).
pub const LONG_MSG_BYTES: usize = 14;

/// Shortest Mode S frame in bytes (56 bits).
pub const SHORT_MSG_BYTES: usize = 7;

/// Downlink formats occupy 0..=31; this marker tags a Mode A/C reply that has
/// been folded into the Mode S message record.
pub const DF_MODE_AC: u8 = 32;

/// Pseudo ICAO addresses for Mode A/C tracks live in the FFxxxx block, which
/// is not allocated to any state.
pub const MODE_AC_ADDR_BASE: u32 = 0x00FF_0000;

// ---------------------------------------------------------------------------
// Field-validity flags
// ---------------------------------------------------------------------------
//
// Shared between the per-message record and the per-aircraft record; the
// tracker merges message flags into the aircraft monotonically.

pub const FLAG_LATLON_VALID: u32 = 1 << 0;
pub const FLAG_ALTITUDE_VALID: u32 = 1 << 1;
pub const FLAG_HEADING_VALID: u32 = 1 << 2;
pub const FLAG_SPEED_VALID: u32 = 1 << 3;
pub const FLAG_VERTRATE_VALID: u32 = 1 << 4;
pub const FLAG_SQUAWK_VALID: u32 = 1 << 5;
pub const FLAG_CALLSIGN_VALID: u32 = 1 << 6;
pub const FLAG_EWSPEED_VALID: u32 = 1 << 7;
pub const FLAG_NSSPEED_VALID: u32 = 1 << 8;
/// Airborne-or-ground state: set = on ground. Only meaningful with
/// [`FLAG_AOG_VALID`].
pub const FLAG_AOG: u32 = 1 << 9;
pub const FLAG_LL_EVEN_VALID: u32 = 1 << 10;
pub const FLAG_LL_ODD_VALID: u32 = 1 << 11;
pub const FLAG_AOG_VALID: u32 = 1 << 12;
pub const FLAG_FS_VALID: u32 = 1 << 13;
pub const FLAG_NSEW_SPEED_VALID: u32 = 1 << 14;
/// The aircraft's own last fix is a trustworthy reference for relative CPR.
pub const FLAG_LATLON_REL_OK: u32 = 1 << 15;

/// Both CPR halves present.
pub const FLAG_LL_BOTH_VALID: u32 = FLAG_LL_EVEN_VALID | FLAG_LL_ODD_VALID;

// Mode A/C tagging flags, kept separate from the field-validity set.

/// Record was synthesised from Mode A/C replies rather than Mode S frames.
pub const MODEAC_FLAG: u32 = 1 << 0;
/// This Mode A/C record probably belongs to an aircraft already tracked
/// through Mode S.
pub const MODEAC_MODES_HIT: u32 = 1 << 1;
pub const MODEAC_MODEA_HIT: u32 = 1 << 2;
pub const MODEAC_MODEC_HIT: u32 = 1 << 3;
/// The reply word is not a plausible Mode C altitude, so only the squawk
/// interpretation applies.
pub const MODEAC_MODEA_ONLY: u32 = 1 << 4;
/// The Mode C match that promoted this record has since gone stale.
pub const MODEAC_MODEC_OLD: u32 = 1 << 5;

// ---------------------------------------------------------------------------
// Altitude unit
// ---------------------------------------------------------------------------

/// Unit of a decoded 13-bit altitude field, selected by the M bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AltitudeUnit {
    #[default]
    Feet,
    Meters,
}

// ---------------------------------------------------------------------------
// Message record
// ---------------------------------------------------------------------------

/// One received downlink frame, decoded.
///
/// Fields past `flags` are only meaningful when the corresponding validity
/// bit is set. A record that failed the CRC/whitelist check carries
/// `crc_ok == false` and no decoded fields at all.
#[derive(Debug, Clone, Default)]
pub struct ModesMessage {
    /// Raw frame bytes, zero padded to 14.
    pub msg: [u8; LONG_MSG_BYTES],
    /// 56 or 112 (16 for a Mode A/C reply).
    pub msg_bits: usize,
    /// Downlink format, or [`DF_MODE_AC`].
    pub df: u8,
    /// 24-bit CRC syndrome.
    pub crc: u32,
    pub crc_ok: bool,
    /// One or two flipped bits were repaired to make the CRC pass.
    pub corrected: bool,
    /// 24-bit ICAO address (explicit or recovered from the syndrome).
    pub addr: u32,
    /// Capability (DF11/17) or control field (DF18) nibble.
    pub ca: u8,
    /// Interrogator ID overlaid on a DF11 syndrome.
    pub iid: u32,
    /// 48-bit device-domain reception timestamp from the Beast header.
    pub timestamp_msg: u64,
    pub signal_level: u8,
    /// Validity bitmap over the decoded fields below.
    pub flags: u32,
    /// Flight status (DF4/5/20/21), or the ident bit of a Mode A/C reply.
    pub fs: u8,
    /// Squawk with each octal digit in its own hex nibble.
    pub squawk: u16,
    pub altitude: i32,
    pub unit: AltitudeUnit,
    /// 8-character callsign, space padded.
    pub callsign: String,
    /// 17-bit CPR latitude sample.
    pub raw_latitude: u32,
    /// 17-bit CPR longitude sample.
    pub raw_longitude: u32,
    /// Decoded position, back-filled by the tracker on a successful CPR
    /// decode.
    pub lat: f64,
    pub lon: f64,
    /// Velocity components in knots, signed east/north positive.
    pub ew_velocity: i32,
    pub ns_velocity: i32,
    /// Ground or air speed in knots.
    pub velocity: i32,
    /// Track in degrees, [0, 360).
    pub heading: i32,
    /// Vertical rate in ft/min, climb positive.
    pub vert_rate: i32,
    /// Extended squitter type and subtype.
    pub metype: u8,
    pub mesub: u8,
}

impl ModesMessage {
    /// True for 112-bit frames.
    pub fn is_long(&self) -> bool {
        self.msg_bits == 112
    }

    /// Raw frame as uppercase hex, trimmed to the frame length.
    pub fn hex(&self) -> String {
        hex_encode(&self.msg[..self.msg_bits.div_ceil(8)])
    }
}

/// Human-readable downlink format name.
pub fn df_name(df: u8) -> &'static str {
    match df {
        0 => "Short air-air surveillance",
        4 => "Surveillance altitude reply",
        5 => "Surveillance identity reply",
        11 => "All-call reply",
        16 => "Long air-air surveillance",
        17 => "ADS-B extended squitter",
        18 => "TIS-B / ADS-R",
        20 => "Comm-B altitude reply",
        21 => "Comm-B identity reply",
        DF_MODE_AC => "Mode A/C",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Address and hex helpers
// ---------------------------------------------------------------------------

/// Format a 24-bit ICAO address as 6-char uppercase hex.
pub fn addr_to_string(addr: u32) -> String {
    format!("{addr:06X}")
}

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

/// Encode bytes as uppercase hex string.
pub fn hex_encode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for &b in data {
        s.push(HEX_CHARS[(b >> 4) as usize] as char);
        s.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    s
}

const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Callsign character set
// ---------------------------------------------------------------------------

/// Six-bit AIS character set used by identification squitters and BDS 2,0.
pub const AIS_CHARSET: &[u8; 64] =
    b"?ABCDEFGHIJKLMNOPQRSTUVWXYZ????? ???????????????0123456789??????";

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Runtime options and the optional station file.
//!
//! Everything has a sensible default so the relay runs against a local
//! Beast source with no configuration at all. A station file supplies the
//! receiver position and uploader credentials; command-line flags take
//! precedence over it.

use std::path::Path;

/// All knobs of the decoding and tracking core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ingest DF32 Mode A/C short replies.
    pub mode_ac: bool,
    /// Beast source.
    pub beast_host: String,
    pub beast_port: u16,
    /// Destination the uploader posts tracks to.
    pub uploader_host: String,
    /// Seconds of silence before a track (and its log entries) is destroyed.
    pub delete_ttl: f64,
    /// Seconds beyond which a prior fix is too old to anchor a surface
    /// position decode.
    pub display_ttl: f64,
    /// Receiver position. Zero/zero means unset.
    pub user_lat: f64,
    pub user_lon: f64,
    /// Suppress the startup banner.
    pub quiet: bool,
    /// Attempt one/two-bit CRC repair on extended squitters.
    pub fix_errors: bool,
    /// Uploader credentials.
    pub auth_code: String,
    pub registration: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode_ac: true,
            beast_host: "127.0.0.1".into(),
            beast_port: 30005,
            uploader_host: "127.0.0.1".into(),
            delete_ttl: 300.0,
            display_ttl: 60.0,
            user_lat: 0.0,
            user_lon: 0.0,
            quiet: false,
            fix_errors: false,
            auth_code: String::new(),
            registration: String::new(),
        }
    }
}

impl Config {
    /// Validated receiver position.
    ///
    /// Valid iff at least one coordinate is non-zero, latitude is within
    /// [-90, 90] and longitude within [-180, 360]; longitudes in (180, 360]
    /// are normalised by subtracting 360.
    pub fn user_position(&self) -> Option<(f64, f64)> {
        if self.user_lat == 0.0 && self.user_lon == 0.0 {
            return None;
        }
        if !(-90.0..=90.0).contains(&self.user_lat) {
            return None;
        }
        if !(-180.0..=360.0).contains(&self.user_lon) {
            return None;
        }
        let lon = if self.user_lon > 180.0 {
            self.user_lon - 360.0
        } else {
            self.user_lon
        };
        Some((self.user_lat, lon))
    }

    /// Fold station-file values under any already-set options.
    ///
    /// The file only fills fields still at their defaults, so command-line
    /// flags win.
    pub fn apply_station(&mut self, station: &StationConfig) {
        if self.user_lat == 0.0 && self.user_lon == 0.0 {
            if let (Some(lat), Some(lon)) = (station.lat, station.lon) {
                self.user_lat = lat;
                self.user_lon = lon;
            }
        }
        if let Some(host) = &station.uploader_host {
            if self.uploader_host == "127.0.0.1" {
                self.uploader_host = host.clone();
            }
        }
        if self.auth_code.is_empty() {
            if let Some(code) = &station.auth_code {
                self.auth_code = code.clone();
            }
        }
        if self.registration.is_empty() {
            if let Some(reg) = &station.registration {
                self.registration = reg.clone();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Station file
// ---------------------------------------------------------------------------

/// Receiver-site settings loaded from a small config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationConfig {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub uploader_host: Option<String>,
    pub auth_code: Option<String>,
    pub registration: Option<String>,
}

/// Load the station file. Missing or unreadable files yield the empty
/// config rather than an error.
pub fn load_station(path: &Path) -> StationConfig {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_station(&text).unwrap_or_default(),
        Err(_) => StationConfig::default(),
    }
}

/// Parse the simple two-level `key: value` station format.
fn parse_station(text: &str) -> Option<StationConfig> {
    let mut station = StationConfig::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        if let Some((key, val)) = stripped.split_once(':') {
            let key = key.trim();
            let val = val.trim();

            if !is_indented {
                if val.is_empty() {
                    current_section = Some(key.to_string());
                } else {
                    current_section = None;
                }
            } else if let Some(ref section) = current_section {
                match section.as_str() {
                    "station" => match key {
                        "lat" => station.lat = parse_float_value(val),
                        "lon" => station.lon = parse_float_value(val),
                        _ => {}
                    },
                    "uploader" => match key {
                        "host" => station.uploader_host = parse_string_value(val),
                        "auth_code" => station.auth_code = parse_string_value(val),
                        "registration" => station.registration = parse_string_value(val),
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }

    Some(station)
}

/// Serialize a station config back to the file format.
pub fn serialize_station(station: &StationConfig) -> String {
    let mut lines = vec!["# skyfeed station configuration".to_string(), String::new()];

    lines.push("station:".into());
    match station.lat {
        Some(v) => lines.push(format!("  lat: {v}")),
        None => lines.push("  lat: null".into()),
    }
    match station.lon {
        Some(v) => lines.push(format!("  lon: {v}")),
        None => lines.push("  lon: null".into()),
    }
    lines.push(String::new());

    lines.push("uploader:".into());
    match &station.uploader_host {
        Some(v) => lines.push(format!("  host: \"{v}\"")),
        None => lines.push("  host: null".into()),
    }
    match &station.auth_code {
        Some(v) => lines.push(format!("  auth_code: \"{v}\"")),
        None => lines.push("  auth_code: null".into()),
    }
    match &station.registration {
        Some(v) => lines.push(format!("  registration: \"{v}\"")),
        None => lines.push("  registration: null".into()),
    }

    lines.join("\n") + "\n"
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if (val.starts_with('"') && val.ends_with('"'))
        || (val.starts_with('\'') && val.ends_with('\''))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

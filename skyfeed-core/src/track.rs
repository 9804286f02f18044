//! Per-aircraft track state built from decoded messages.
//!
//! The tracker owns the live aircraft set, keyed by 24-bit address, and the
//! shared downlink-frame log. Each CRC-valid message updates exactly one
//! record; Mode A/C replies additionally cross-correlate against every Mode S
//! track to decide whether the short reply belongs to an aircraft that is
//! already tracked. A once-per-second sweep destroys records that have gone
//! silent.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::cpr;
use crate::dflog::FrameLog;
use crate::fields::mode_a_to_mode_c;
use crate::types::*;

/// Default seconds of silence before a track is destroyed.
pub const DEFAULT_DELETE_TTL: f64 = 300.0;

/// Default seconds beyond which a prior fix is not reused as the surface
/// CPR reference.
pub const DEFAULT_DISPLAY_TTL: f64 = 60.0;

/// Mode A/C tracks only reach the frame log once this many messages have
/// accumulated, to keep noise words out.
const MODE_AC_LOG_THRESHOLD: u64 = 15;

// ---------------------------------------------------------------------------
// Aircraft record
// ---------------------------------------------------------------------------

/// Long-lived state for one tracked aircraft.
#[derive(Debug, Clone, Serialize)]
pub struct Aircraft {
    /// 24-bit ICAO address, or a pseudo address for Mode A/C tracks.
    pub addr: u32,
    /// Wall time of the last accepted message, UNIX seconds.
    pub seen: f64,
    /// Device-domain timestamp of the last accepted message.
    pub timestamp: u64,
    /// Accepted message count. Monotonic, except for the single reset when a
    /// matched Mode A/C track changes altitude.
    pub messages: u64,
    /// The eight most recent signal amplitudes, indexed by `messages mod 8`.
    pub signal_level: [u8; 8],
    pub callsign: String,
    /// Altitude in feet, and its 100 ft Mode C quantisation.
    pub altitude: i32,
    pub mode_c: i32,
    pub squawk: u16,
    /// Track in degrees, speed in knots, vertical rate in ft/min.
    pub track: i32,
    pub speed: i32,
    pub vert_rate: i32,
    pub lat: f64,
    pub lon: f64,
    /// Wall and device times of the last successful position decode.
    pub seen_latlon: f64,
    pub timestamp_latlon: u64,
    /// Raw CPR samples with wall-clock capture times in milliseconds.
    pub even_cpr_lat: u32,
    pub even_cpr_lon: u32,
    pub even_cpr_time: u64,
    pub odd_cpr_lat: u32,
    pub odd_cpr_lon: u32,
    pub odd_cpr_time: u64,
    /// Field-validity bits merged from every accepted message.
    pub flags: u32,
    /// Mode A/C correlation state.
    pub modeac_flags: u32,
    pub mode_a_count: u64,
    pub mode_c_count: u64,
}

impl Aircraft {
    fn new(mm: &ModesMessage, now: f64) -> Self {
        Aircraft {
            addr: mm.addr,
            seen: now,
            timestamp: mm.timestamp_msg,
            messages: 0,
            // Prime the whole ring with the first sample
            signal_level: [mm.signal_level; 8],
            callsign: String::new(),
            altitude: 0,
            mode_c: 0,
            squawk: 0,
            track: 0,
            speed: 0,
            vert_rate: 0,
            lat: 0.0,
            lon: 0.0,
            seen_latlon: 0.0,
            timestamp_latlon: 0,
            even_cpr_lat: 0,
            even_cpr_lon: 0,
            even_cpr_time: 0,
            odd_cpr_lat: 0,
            odd_cpr_lon: 0,
            odd_cpr_time: 0,
            flags: 0,
            modeac_flags: 0,
            mode_a_count: 0,
            mode_c_count: 0,
        }
    }

    /// True for tracks synthesised from Mode A/C replies.
    pub fn is_mode_ac(&self) -> bool {
        self.modeac_flags & MODEAC_FLAG != 0
    }

    pub fn has_position(&self) -> bool {
        self.flags & FLAG_LATLON_VALID != 0
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Live track set plus the staleness machinery.
pub struct Tracker {
    aircraft: HashMap<u32, Aircraft>,
    frame_log: Arc<FrameLog>,
    user_pos: Option<(f64, f64)>,
    delete_ttl: f64,
    display_ttl: f64,
    last_sweep: i64,
}

impl Tracker {
    pub fn new(
        user_pos: Option<(f64, f64)>,
        delete_ttl: f64,
        display_ttl: f64,
        frame_log: Arc<FrameLog>,
    ) -> Self {
        Tracker {
            aircraft: HashMap::new(),
            frame_log,
            user_pos,
            delete_ttl,
            display_ttl,
            last_sweep: i64::MIN,
        }
    }

    /// Fold one decoded message into the track set.
    ///
    /// Returns the updated record, or `None` for messages that failed the
    /// CRC/whitelist check. On a successful position decode the message is
    /// back-filled with the resolved coordinates.
    pub fn receive(&mut self, mm: &mut ModesMessage, now: f64) -> Option<&Aircraft> {
        if !mm.crc_ok {
            return None;
        }

        let addr = mm.addr;
        if !self.aircraft.contains_key(&addr) {
            let mut aircraft = Aircraft::new(mm, now);
            if mm.df == DF_MODE_AC {
                // The reply word doubles as a Mode C altitude when the bit
                // pattern is a legal one; decide the interpretation once at
                // creation since the word can never change for this address.
                aircraft.modeac_flags = MODEAC_FLAG;
                match mode_a_to_mode_c(mm.squawk | mm.fs as u16) {
                    Some(mode_c) if mode_c >= -12 => {
                        mm.altitude = mode_c * 100;
                        mm.flags |= FLAG_ALTITUDE_VALID;
                    }
                    _ => aircraft.modeac_flags |= MODEAC_MODEA_ONLY,
                }
            }
            self.aircraft.insert(addr, aircraft);
            log::debug!("new aircraft {}", addr_to_string(addr));
        }

        let user_pos = self.user_pos;
        let display_ttl = self.display_ttl;
        let messages;
        {
            let aircraft = self.aircraft.get_mut(&addr).expect("just inserted");

            aircraft.signal_level[(aircraft.messages & 7) as usize] = mm.signal_level;
            aircraft.seen = now;
            aircraft.timestamp = mm.timestamp_msg;
            aircraft.messages += 1;

            if mm.flags & FLAG_CALLSIGN_VALID != 0 {
                aircraft.callsign = mm.callsign.clone();
            }

            if mm.flags & FLAG_ALTITUDE_VALID != 0 {
                if aircraft.mode_c_count > 0 && aircraft.altitude != mm.altitude {
                    // Altitude moved: the standing Mode C correlation no
                    // longer holds.
                    aircraft.mode_c_count = 0;
                    aircraft.modeac_flags &= !MODEAC_MODEC_HIT;
                }
                if aircraft.modeac_flags & MODEAC_MODEC_OLD != 0 && aircraft.altitude != mm.altitude
                {
                    // A previously matched Mode A/C track at a new altitude
                    // starts over so it is not suppressed as a duplicate.
                    aircraft.modeac_flags &= !MODEAC_MODEC_OLD;
                    aircraft.messages = 1;
                }
                aircraft.altitude = mm.altitude;
                aircraft.mode_c = (mm.altitude + 49) / 100;
            }

            if mm.flags & FLAG_SQUAWK_VALID != 0 {
                if aircraft.squawk != mm.squawk {
                    aircraft.mode_a_count = 0;
                    aircraft.modeac_flags &= !MODEAC_MODEA_HIT;
                }
                aircraft.squawk = mm.squawk;
            }

            if mm.flags & FLAG_HEADING_VALID != 0 {
                aircraft.track = mm.heading;
            }
            if mm.flags & FLAG_SPEED_VALID != 0 {
                aircraft.speed = mm.velocity;
            }
            if mm.flags & FLAG_VERTRATE_VALID != 0 {
                aircraft.vert_rate = mm.vert_rate;
            }

            // Landed or took off since the last message: stale CPR halves
            // must not pair across the transition.
            if mm.flags & FLAG_AOG_VALID != 0 && (aircraft.flags ^ mm.flags) & FLAG_AOG != 0 {
                aircraft.flags &= !(FLAG_LL_BOTH_VALID | FLAG_AOG);
            }

            if mm.flags & FLAG_LL_BOTH_VALID != 0 {
                let odd = mm.flags & FLAG_LL_ODD_VALID != 0;
                let capture_ms = (now * 1000.0) as u64;
                if odd {
                    aircraft.odd_cpr_lat = mm.raw_latitude;
                    aircraft.odd_cpr_lon = mm.raw_longitude;
                    aircraft.odd_cpr_time = capture_ms;
                } else {
                    aircraft.even_cpr_lat = mm.raw_latitude;
                    aircraft.even_cpr_lon = mm.raw_longitude;
                    aircraft.even_cpr_time = capture_ms;
                }

                let surface = mm.flags & FLAG_AOG != 0;
                let mut located = false;

                let both_halves =
                    (aircraft.flags | mm.flags) & FLAG_LL_BOTH_VALID == FLAG_LL_BOTH_VALID;
                if both_halves
                    && aircraft.even_cpr_time.abs_diff(aircraft.odd_cpr_time) <= cpr::MAX_PAIR_AGE_MS
                {
                    let reference = if surface {
                        surface_reference(aircraft, user_pos, display_ttl, now)
                    } else {
                        None
                    };
                    if let Some((lat, lon)) = cpr::decode_global(
                        (aircraft.even_cpr_lat, aircraft.even_cpr_lon),
                        (aircraft.odd_cpr_lat, aircraft.odd_cpr_lon),
                        odd,
                        surface,
                        reference,
                    ) {
                        aircraft.lat = lat;
                        aircraft.lon = lon;
                        located = true;
                    }
                }

                if !located {
                    // One half missing or the pair too old: resolve the new
                    // sample against the freshest reference available.
                    let reference = if aircraft.flags & FLAG_LATLON_REL_OK != 0 {
                        Some((aircraft.lat, aircraft.lon))
                    } else {
                        user_pos
                    };
                    if let Some(reference) = reference {
                        let sample = if odd {
                            (aircraft.odd_cpr_lat, aircraft.odd_cpr_lon)
                        } else {
                            (aircraft.even_cpr_lat, aircraft.even_cpr_lon)
                        };
                        match cpr::decode_relative(sample, odd, surface, reference) {
                            Some((lat, lon)) => {
                                aircraft.lat = lat;
                                aircraft.lon = lon;
                                located = true;
                            }
                            None => {
                                // The candidate was implausible; stop trusting
                                // the own-position reference until a global
                                // decode restores it.
                                aircraft.flags &= !FLAG_LATLON_REL_OK;
                            }
                        }
                    }
                }

                if located {
                    aircraft.seen_latlon = now;
                    aircraft.timestamp_latlon = mm.timestamp_msg;
                    aircraft.flags |= FLAG_LATLON_VALID | FLAG_LATLON_REL_OK;
                    mm.flags |= FLAG_LATLON_VALID;
                    mm.lat = aircraft.lat;
                    mm.lon = aircraft.lon;
                }
            }

            aircraft.flags |= mm.flags;
            messages = aircraft.messages;
        }

        if mm.df != DF_MODE_AC || messages > MODE_AC_LOG_THRESHOLD {
            self.frame_log.record(mm, now);
        }

        if mm.df == DF_MODE_AC {
            self.crosstag_mode_ac(addr);
        }

        self.aircraft.get(&addr)
    }

    /// Cross-correlate a Mode A/C track against every Mode S track.
    ///
    /// Squawk matches count as Mode A hits, quantised-altitude matches
    /// within one 100 ft step as Mode C hits. A squawk collision is far less
    /// likely than an altitude collision, so a Mode A hit alone can promote
    /// the track when its word is not a plausible altitude; a Mode C hit
    /// promotes only on top of an established Mode A hit.
    fn crosstag_mode_ac(&mut self, ac_addr: u32) {
        let Some(mut ac) = self.aircraft.remove(&ac_addr) else {
            return;
        };

        // Fresh attempt each arrival
        ac.modeac_flags &= !(MODEAC_MODEA_HIT | MODEAC_MODEC_HIT | MODEAC_MODES_HIT);

        for other in self.aircraft.values_mut() {
            if other.is_mode_ac() {
                continue;
            }

            if ac.flags & other.flags & FLAG_SQUAWK_VALID != 0 && ac.squawk == other.squawk {
                other.mode_a_count = ac.messages;
                other.modeac_flags |= MODEAC_MODEA_HIT;
                ac.modeac_flags |= MODEAC_MODEA_HIT;
                if other.mode_a_count > 0
                    && (other.mode_c_count > 1 || ac.modeac_flags & MODEAC_MODEA_ONLY != 0)
                {
                    ac.modeac_flags |= MODEAC_MODES_HIT;
                }
            }

            if ac.flags & other.flags & FLAG_ALTITUDE_VALID != 0
                && (ac.mode_c - other.mode_c).abs() <= 1
            {
                other.mode_c_count = ac.messages;
                other.modeac_flags |= MODEAC_MODEC_HIT;
                ac.modeac_flags |= MODEAC_MODEC_HIT;
                if other.mode_a_count > 0 && other.mode_c_count > 1 {
                    ac.modeac_flags |= MODEAC_MODES_HIT | MODEAC_MODEC_OLD;
                }
            }
        }

        self.aircraft.insert(ac_addr, ac);
    }

    /// Destroy tracks silent for longer than the delete TTL and prune the
    /// frame log. Runs at most once per wall-clock second.
    pub fn remove_stale(&mut self, now: f64) {
        if now as i64 == self.last_sweep {
            return;
        }
        self.last_sweep = now as i64;

        self.frame_log.prune(now, self.delete_ttl);

        let ttl = self.delete_ttl;
        self.aircraft.retain(|addr, aircraft| {
            let live = now - aircraft.seen <= ttl;
            if !live {
                log::debug!("dropping stale aircraft {}", addr_to_string(*addr));
            }
            live
        });
    }

    pub fn find_aircraft(&self, addr: u32) -> Option<&Aircraft> {
        self.aircraft.get(&addr)
    }

    /// All live tracks, most recently heard first.
    pub fn tracks(&self) -> Vec<&Aircraft> {
        let mut tracks: Vec<_> = self.aircraft.values().collect();
        tracks.sort_by(|a, b| b.seen.total_cmp(&a.seen));
        tracks
    }

    pub fn frame_log(&self) -> &Arc<FrameLog> {
        &self.frame_log
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }
}

/// Reference for rotating a surface decode into the right quadrant: the
/// aircraft's own fix while fresh, else the receiver location.
fn surface_reference(
    aircraft: &Aircraft,
    user_pos: Option<(f64, f64)>,
    display_ttl: f64,
    now: f64,
) -> Option<(f64, f64)> {
    if aircraft.flags & FLAG_LATLON_VALID != 0 && now - aircraft.seen_latlon < display_ttl {
        Some((aircraft.lat, aircraft.lon))
    } else {
        user_pos
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

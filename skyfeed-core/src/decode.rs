//! Parse raw downlink frames into `ModesMessage` records.
//!
//! Dispatch on the Downlink Format (top 5 bits of byte 0):
//! - DF0/16:  short/long air-air surveillance (VS bit, 13-bit altitude)
//! - DF4/20:  surveillance / Comm-B altitude reply
//! - DF5/21:  surveillance / Comm-B identity reply (squawk)
//! - DF11:    all-call reply (address acquisition)
//! - DF17/18: extended squitter, sub-dispatched on the ME type
//! - everything else: accepted only on an address-whitelist hit, no fields
//!
//! A frame that fails the CRC/whitelist check comes back with
//! `crc_ok == false` and no decoded fields.

use crate::crc::{self, IcaoCache};
use crate::fields::{
    decode_ac12, decode_ac13, decode_callsign, decode_id13, decode_movement,
};
use crate::types::*;

/// DF11 syndromes below this value are interrogator IDs overlaid on an
/// otherwise clean reply.
const MAX_IID: u32 = 80;

/// Decode one Mode S frame delivered by the framing layer.
///
/// `raw` must hold at least 7 bytes (56-bit frame) or 14 bytes for the long
/// formats; `now` is wall time in UNIX seconds for whitelist bookkeeping.
pub fn decode_message(
    raw: &[u8],
    timestamp_msg: u64,
    signal_level: u8,
    now: f64,
    cache: &mut IcaoCache,
    fix_errors: bool,
) -> ModesMessage {
    let df = raw[0] >> 3;
    let msg_bits = if df & 0x10 != 0 { 112 } else { 56 };
    let n_bytes = msg_bits / 8;

    let mut mm = ModesMessage {
        df,
        msg_bits,
        timestamp_msg,
        signal_level,
        ..Default::default()
    };

    if raw.len() < n_bytes {
        return mm;
    }
    mm.msg[..n_bytes].copy_from_slice(&raw[..n_bytes]);

    mm.crc = crc::checksum(&mm.msg, msg_bits);
    if mm.crc != 0 && fix_errors && (df == 17 || df == 18) {
        let mut repaired = mm.msg;
        if crc::repair(&mut repaired[..n_bytes], msg_bits) {
            mm.msg = repaired;
            mm.crc = 0;
            mm.corrected = true;
        }
    }

    match df {
        11 => {
            // All-call reply: address is explicit, a small syndrome is an
            // interrogator ID rather than corruption.
            mm.iid = mm.crc;
            mm.addr = explicit_addr(&mm.msg);
            mm.ca = mm.msg[0] & 0x07;
            if mm.crc == 0 {
                mm.crc_ok = true;
                cache.add(mm.addr, now);
            } else if mm.crc < MAX_IID {
                mm.crc_ok = cache.seen_recently(mm.addr, now);
                if mm.crc_ok {
                    cache.add(mm.addr, now);
                }
            }
        }
        17 | 18 => {
            mm.addr = explicit_addr(&mm.msg);
            mm.ca = mm.msg[0] & 0x07;
            mm.crc_ok = mm.crc == 0;
            if mm.crc_ok {
                cache.add(mm.addr, now);
            }
        }
        _ => {
            // The transmitter XORed its address into the parity, so the
            // syndrome is the address; trust it only if recently seen clean.
            mm.addr = mm.crc;
            mm.crc_ok = cache.seen_recently(mm.addr, now);
            if mm.crc_ok {
                cache.add(mm.addr, now);
            }
        }
    }

    if !mm.crc_ok {
        return mm;
    }

    decode_fields(&mut mm);
    mm
}

fn explicit_addr(msg: &[u8]) -> u32 {
    (msg[1] as u32) << 16 | (msg[2] as u32) << 8 | msg[3] as u32
}

fn decode_fields(mm: &mut ModesMessage) {
    let msg = mm.msg;
    let df = mm.df;

    // DF0, DF16: vertical status bit
    if df == 0 || df == 16 {
        mm.flags |= FLAG_AOG_VALID;
        if msg[0] & 0x04 != 0 {
            mm.flags |= FLAG_AOG;
        }
    }

    // DF11, DF17: capability nibble encodes ground/airborne for CA 4/5
    if df == 11 || df == 17 {
        if mm.ca == 4 {
            mm.flags |= FLAG_AOG_VALID | FLAG_AOG;
        } else if mm.ca == 5 {
            mm.flags |= FLAG_AOG_VALID;
        }
    }

    // DF5, DF21: Gillham encoded squawk
    if df == 5 || df == 21 {
        let id13 = ((msg[2] as u32) << 8 | msg[3] as u32) & 0x1FFF;
        if id13 != 0 {
            mm.flags |= FLAG_SQUAWK_VALID;
            mm.squawk = decode_id13(id13);
        }
    }

    // DF0, DF4, DF16, DF20: 13-bit altitude
    if matches!(df, 0 | 4 | 16 | 20) {
        let ac13 = ((msg[2] as u32) << 8 | msg[3] as u32) & 0x1FFF;
        if ac13 != 0 {
            mm.flags |= FLAG_ALTITUDE_VALID;
            let (altitude, unit) = decode_ac13(ac13);
            mm.altitude = altitude;
            mm.unit = unit;
        }
    }

    // DF4, DF5, DF20, DF21: flight status
    if matches!(df, 4 | 5 | 20 | 21) {
        mm.flags |= FLAG_FS_VALID;
        mm.fs = msg[0] & 0x07;
        if mm.fs <= 3 {
            mm.flags |= FLAG_AOG_VALID;
            if mm.fs & 1 != 0 {
                mm.flags |= FLAG_AOG;
            }
        }
    }

    // DF17, and DF18 with CF 0/1/6 (the CF 6 rebroadcast carries the same
    // ME layout as DF17)
    if df == 17 || (df == 18 && matches!(mm.ca, 0 | 1 | 6)) {
        decode_extended_squitter(mm);
    }

    // DF20, DF21: Comm-B aircraft identification register
    if (df == 20 || df == 21) && msg[4] == 0x20 {
        mm.flags |= FLAG_CALLSIGN_VALID;
        mm.callsign = decode_callsign(&msg[5..11]);
    }
}

fn decode_extended_squitter(mm: &mut ModesMessage) {
    let msg = mm.msg;
    let metype = msg[4] >> 3;
    let mesub = if metype == 29 {
        (msg[4] & 0x06) >> 1
    } else {
        msg[4] & 0x07
    };
    mm.metype = metype;
    mm.mesub = mesub;

    match metype {
        // Aircraft identification and category
        1..=4 => {
            mm.flags |= FLAG_CALLSIGN_VALID;
            mm.callsign = decode_callsign(&msg[5..11]);
        }

        // Surface position
        5..=8 => {
            decode_cpr_samples(mm);
            mm.flags |= FLAG_AOG_VALID | FLAG_AOG;

            let movement = ((msg[4] as u32) << 4 | (msg[5] as u32) >> 4) & 0x007F;
            if movement != 0 && movement < 125 {
                mm.flags |= FLAG_SPEED_VALID;
                mm.velocity = decode_movement(movement);
            }

            if msg[5] & 0x08 != 0 {
                mm.flags |= FLAG_HEADING_VALID;
                mm.heading = ((((msg[5] as u32) << 4 | (msg[6] as u32) >> 4) & 0x007F) * 45 >> 4)
                    as i32;
            }
        }

        // Airborne position
        9..=18 | 20..=22 => {
            decode_cpr_samples(mm);
            mm.flags |= FLAG_AOG_VALID;

            let ac12 = ((msg[5] as u32) << 4 | (msg[6] as u32) >> 4) & 0x0FFF;
            if ac12 != 0 {
                mm.flags |= FLAG_ALTITUDE_VALID;
                mm.altitude = decode_ac12(ac12);
                mm.unit = AltitudeUnit::Feet;
            }
        }

        // Airborne velocity
        19 => decode_velocity(mm, mesub),

        // Test message with squawk overlay
        23 => {
            if mesub == 7 {
                let id13 = (((msg[5] as u32) << 8 | msg[6] as u32) & 0xFFF1) >> 3;
                if id13 != 0 {
                    mm.flags |= FLAG_SQUAWK_VALID;
                    mm.squawk = decode_id13(id13);
                }
            }
        }

        // Aircraft status: emergency squawk
        28 => {
            if mesub == 1 {
                let id13 = ((msg[5] as u32) << 8 | msg[6] as u32) & 0x1FFF;
                if id13 != 0 {
                    mm.flags |= FLAG_SQUAWK_VALID;
                    mm.squawk = decode_id13(id13);
                }
            }
        }

        // Recognised but not decoded
        _ => {}
    }
}

fn decode_cpr_samples(mm: &mut ModesMessage) {
    let msg = mm.msg;
    mm.raw_latitude = ((msg[6] as u32 & 0x03) << 15) | (msg[7] as u32) << 7 | (msg[8] as u32) >> 1;
    mm.raw_longitude = ((msg[8] as u32 & 0x01) << 16) | (msg[9] as u32) << 8 | msg[10] as u32;
    mm.flags |= if msg[6] & 0x04 != 0 {
        FLAG_LL_ODD_VALID
    } else {
        FLAG_LL_EVEN_VALID
    };
}

fn decode_velocity(mm: &mut ModesMessage, mesub: u8) {
    let msg = mm.msg;

    // A velocity squitter implies airborne
    mm.flags |= FLAG_AOG_VALID;

    if (1..=4).contains(&mesub) {
        let vert_rate = ((msg[8] as i32 & 0x07) << 6) | (msg[9] as i32 >> 2);
        if vert_rate != 0 {
            // Sign-magnitude with a bias of 1
            let mut vr = vert_rate - 1;
            if msg[8] & 0x08 != 0 {
                vr = -vr;
            }
            mm.vert_rate = vr * 64;
            mm.flags |= FLAG_VERTRATE_VALID;
        }
    }

    if mesub == 1 || mesub == 2 {
        let ew_raw = ((msg[5] as i32 & 0x03) << 8) | msg[6] as i32;
        let mut ew_vel = ew_raw - 1;
        let ns_raw = ((msg[7] as i32 & 0x7F) << 3) | (msg[8] as i32 >> 5);
        let mut ns_vel = ns_raw - 1;

        if mesub == 2 {
            // Supersonic: units of 4 kt
            ew_vel <<= 2;
            ns_vel <<= 2;
        }

        if ew_raw != 0 {
            mm.flags |= FLAG_EWSPEED_VALID;
            if msg[5] & 0x04 != 0 {
                ew_vel = -ew_vel;
            }
            mm.ew_velocity = ew_vel;
        }

        if ns_raw != 0 {
            mm.flags |= FLAG_NSSPEED_VALID;
            if msg[7] & 0x80 != 0 {
                ns_vel = -ns_vel;
            }
            mm.ns_velocity = ns_vel;
        }

        if ew_raw != 0 && ns_raw != 0 {
            mm.flags |= FLAG_SPEED_VALID | FLAG_HEADING_VALID | FLAG_NSEW_SPEED_VALID;
            let (ew, ns) = (mm.ew_velocity as f64, mm.ns_velocity as f64);
            mm.velocity = (ew * ew + ns * ns).sqrt() as i32;

            if mm.velocity != 0 {
                let mut heading = ew.atan2(ns).to_degrees() as i32;
                if heading < 0 {
                    heading += 360;
                }
                mm.heading = heading;
            }
        }
    } else if mesub == 3 || mesub == 4 {
        let airspeed = ((msg[7] as i32 & 0x7F) << 3) | (msg[8] as i32 >> 5);
        if airspeed != 0 {
            mm.flags |= FLAG_SPEED_VALID;
            let mut speed = airspeed - 1;
            if mesub == 4 {
                speed <<= 2;
            }
            mm.velocity = speed;
        }

        if msg[5] & 0x04 != 0 {
            mm.flags |= FLAG_HEADING_VALID;
            mm.heading = ((((msg[5] as i32 & 0x03) << 8) | msg[6] as i32) * 45) >> 7;
        }
    }
}

// ---------------------------------------------------------------------------
// Mode A/C
// ---------------------------------------------------------------------------

/// Fold a demodulated Mode A/C reply word into a message record.
///
/// The word arrives hex-packed (squawk 7500 as 0x7500) with the ident pulse
/// at 0x0080. There is no parity to check, so the record is always valid;
/// the pseudo address keys a synthetic track in the unallocated FFxxxx
/// block.
pub fn decode_mode_ac(word: u16, timestamp_msg: u64, signal_level: u8) -> ModesMessage {
    let mut mm = ModesMessage {
        df: DF_MODE_AC,
        msg_bits: 16,
        timestamp_msg,
        signal_level,
        crc_ok: true,
        ..Default::default()
    };

    mm.msg[0] = (word >> 8) as u8;
    mm.msg[1] = word as u8;

    mm.addr = MODE_AC_ADDR_BASE | (word as u32 & 0xFF7F);
    mm.squawk = word & 0x7777;
    mm.flags |= FLAG_SQUAWK_VALID;
    mm.fs = (word & 0x0080) as u8;

    mm
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    fn decode_uncached(hex: &str) -> ModesMessage {
        let raw = hex_decode(hex).expect("valid hex");
        let mut cache = IcaoCache::new();
        decode_message(&raw, 0, 0, 1.0, &mut cache, false)
    }

    /// Overwrite the parity field so the syndrome comes out as `xor`.
    fn seal(msg: &mut [u8], xor: u32) {
        let n = msg.len();
        msg[n - 3] = 0;
        msg[n - 2] = 0;
        msg[n - 1] = 0;
        let parity = crc::checksum(msg, n * 8) ^ xor;
        msg[n - 3] = (parity >> 16) as u8;
        msg[n - 2] = (parity >> 8) as u8;
        msg[n - 1] = parity as u8;
    }

    // -- DF17 --

    #[test]
    fn test_df17_identification() {
        let mm = decode_uncached("8D4840D6202CC371C32CE0576098");
        assert_eq!(mm.df, 17);
        assert_eq!(mm.addr, 0x4840D6);
        assert!(mm.crc_ok);
        assert!(!mm.corrected);
        assert!(mm.is_long());
        assert_eq!(mm.metype, 4);
        assert!(mm.flags & FLAG_CALLSIGN_VALID != 0);
        assert_eq!(mm.callsign, "KLM1023 ");
    }

    #[test]
    fn test_df17_airborne_position_even() {
        let mm = decode_uncached("8D40621D58C382D690C8AC2863A7");
        assert_eq!(mm.addr, 0x40621D);
        assert!(mm.flags & FLAG_ALTITUDE_VALID != 0);
        assert_eq!(mm.altitude, 38000);
        assert!(mm.flags & FLAG_LL_EVEN_VALID != 0);
        assert!(mm.flags & FLAG_LL_ODD_VALID == 0);
        assert_eq!(mm.raw_latitude, 93000);
        assert_eq!(mm.raw_longitude, 51372);
        assert!(mm.flags & FLAG_AOG_VALID != 0);
        assert!(mm.flags & FLAG_AOG == 0);
    }

    #[test]
    fn test_df17_airborne_position_odd() {
        let mm = decode_uncached("8D40621D58C386435CC412692AD6");
        assert!(mm.flags & FLAG_LL_ODD_VALID != 0);
        assert_eq!(mm.raw_latitude, 74158);
        assert_eq!(mm.raw_longitude, 50194);
        assert_eq!(mm.altitude, 38000);
    }

    #[test]
    fn test_df17_velocity() {
        let mm = decode_uncached("8D485020994409940838175B284F");
        assert_eq!(mm.addr, 0x485020);
        assert_eq!(mm.metype, 19);
        assert_eq!(mm.mesub, 1);
        assert!(mm.flags & FLAG_NSEW_SPEED_VALID != 0);
        assert_eq!(mm.ew_velocity, -8);
        assert_eq!(mm.ns_velocity, -159);
        assert_eq!(mm.velocity, 159);
        assert_eq!(mm.heading, 183);
        assert_eq!(mm.vert_rate, -832);
    }

    #[test]
    fn test_df17_corrupted_rejected() {
        let mut raw = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        raw[5] ^= 0x01;
        let mut cache = IcaoCache::new();
        let mm = decode_message(&raw, 0, 0, 1.0, &mut cache, false);
        assert!(!mm.crc_ok);
        assert_eq!(mm.flags, 0, "no fields on a failed check");
    }

    #[test]
    fn test_df17_corrupted_repaired() {
        let mut raw = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        raw[5] ^= 0x01;
        let mut cache = IcaoCache::new();
        let mm = decode_message(&raw, 0, 0, 1.0, &mut cache, true);
        assert!(mm.crc_ok);
        assert!(mm.corrected);
        assert_eq!(mm.callsign, "KLM1023 ");
    }

    // -- DF11 --

    #[test]
    fn test_df11_clean_promotes_to_cache() {
        let mut msg = [0x5D, 0x48, 0x40, 0xD6, 0, 0, 0];
        seal(&mut msg, 0);
        let mut cache = IcaoCache::new();
        let mm = decode_message(&msg, 0, 0, 1.0, &mut cache, false);

        assert_eq!(mm.df, 11);
        assert!(mm.crc_ok);
        assert_eq!(mm.addr, 0x4840D6);
        assert_eq!(mm.ca, 5);
        assert!(mm.flags & FLAG_AOG_VALID != 0);
        assert!(cache.seen_recently(0x4840D6, 2.0));
    }

    #[test]
    fn test_df11_iid_needs_cache_hit() {
        let mut msg = [0x5D, 0x48, 0x40, 0xD6, 0, 0, 0];
        seal(&mut msg, 7); // interrogator ID 7 overlaid on the parity

        let mut cache = IcaoCache::new();
        let mm = decode_message(&msg, 0, 0, 1.0, &mut cache, false);
        assert!(!mm.crc_ok, "unknown address with IID overlay is rejected");

        cache.add(0x4840D6, 0.5);
        let mm = decode_message(&msg, 0, 0, 1.0, &mut cache, false);
        assert!(mm.crc_ok);
        assert_eq!(mm.iid, 7);
    }

    #[test]
    fn test_df11_large_syndrome_rejected() {
        let mut msg = [0x5D, 0x48, 0x40, 0xD6, 0, 0, 0];
        seal(&mut msg, 0x123456);
        let mut cache = IcaoCache::new();
        cache.add(0x4840D6, 0.5);
        let mm = decode_message(&msg, 0, 0, 1.0, &mut cache, false);
        assert!(!mm.crc_ok);
    }

    // -- Address recovery via the parity overlay --

    #[test]
    fn test_df4_recovered_address() {
        // DF4, FS=0, altitude field 0x1838 -> 38000 ft at 25 ft resolution
        let mut msg = [0x20, 0x00, 0x18, 0x38, 0, 0, 0];
        seal(&mut msg, 0xABC123);

        let mut cache = IcaoCache::new();
        let mm = decode_message(&msg, 0, 0, 10.0, &mut cache, false);
        assert!(!mm.crc_ok, "address not yet whitelisted");

        cache.add(0xABC123, 5.0);
        let mm = decode_message(&msg, 0, 0, 10.0, &mut cache, false);
        assert!(mm.crc_ok);
        assert_eq!(mm.addr, 0xABC123);
        assert!(mm.flags & FLAG_ALTITUDE_VALID != 0);
        assert_eq!(mm.altitude, 38000);
        assert!(mm.flags & FLAG_FS_VALID != 0);

        // Acceptance refreshed the cache entry
        assert!(cache.seen_recently(0xABC123, 69.0));
    }

    #[test]
    fn test_df5_squawk() {
        let id13 = {
            // squawk 7500 in the interleaved field
            use crate::fields::decode_id13;
            (0..0x2000u32)
                .find(|&f| decode_id13(f) == 0x7500)
                .unwrap()
        };
        let mut msg = [0x28, 0x00, 0, 0, 0, 0, 0];
        msg[2] = (id13 >> 8) as u8;
        msg[3] = id13 as u8;
        seal(&mut msg, 0xABC123);

        let mut cache = IcaoCache::new();
        cache.add(0xABC123, 1.0);
        let mm = decode_message(&msg, 0, 0, 2.0, &mut cache, false);
        assert!(mm.crc_ok);
        assert_eq!(mm.df, 5);
        assert!(mm.flags & FLAG_SQUAWK_VALID != 0);
        assert_eq!(mm.squawk, 0x7500);
    }

    #[test]
    fn test_df0_vertical_status() {
        let mut msg = [0x04, 0x00, 0x1C, 0x38, 0, 0, 0];
        seal(&mut msg, 0xABC123);
        let mut cache = IcaoCache::new();
        cache.add(0xABC123, 1.0);
        let mm = decode_message(&msg, 0, 0, 2.0, &mut cache, false);
        assert!(mm.crc_ok);
        assert!(mm.flags & FLAG_AOG_VALID != 0);
        assert!(mm.flags & FLAG_AOG != 0, "VS bit set means on ground");
    }

    // -- Mode A/C --

    #[test]
    fn test_mode_ac_squawk() {
        let mm = decode_mode_ac(0x7500, 42, 100);
        assert_eq!(mm.df, DF_MODE_AC);
        assert!(mm.crc_ok);
        assert_eq!(mm.squawk, 0x7500);
        assert_eq!(mm.addr, 0x00FF7500);
        assert!(mm.flags & FLAG_SQUAWK_VALID != 0);
        assert_eq!(mm.fs, 0);
    }

    #[test]
    fn test_mode_ac_ident_bit() {
        let mm = decode_mode_ac(0x7580, 0, 0);
        assert_eq!(mm.squawk, 0x7500, "ident pulse is not a squawk digit");
        assert_eq!(mm.fs, 0x80);
        assert_eq!(mm.addr, 0x00FF7500, "ident bit removed from the address");
    }
}

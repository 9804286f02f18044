//! Compact Position Reporting decode.
//!
//! Positions arrive split across even and odd frames, each carrying 17 bits
//! of latitude and longitude. Two decode modes:
//! - Global: an even/odd pair captured close together, no reference needed
//!   (airborne) or rotated into the receiver's quadrant (surface).
//! - Relative: a single frame resolved against a reference position, either
//!   the aircraft's own last fix or the receiver location.

/// Even and odd frames further apart than this (milliseconds) are never
/// combined for a global decode.
pub const MAX_PAIR_AGE_MS: u64 = 10_000;

const CPR_MAX: f64 = 131072.0; // 2^17

/// Latitudes at which the number of longitude zones steps down, from 59
/// zones at the equator to 2 just below 87 degrees; beyond the last edge a
/// single zone remains. Symmetric about the equator.
const NL_EDGES: [f64; 58] = [
    10.47047130,
    14.82817437,
    18.18626357,
    21.02939493,
    23.54504487,
    25.82924707,
    27.93898710,
    29.91135686,
    31.77209708,
    33.53993436,
    35.22899598,
    36.85025108,
    38.41241892,
    39.92256684,
    41.38651832,
    42.80914012,
    44.19454951,
    45.54626723,
    46.86733252,
    48.16039128,
    49.42776439,
    50.67150166,
    51.89342469,
    53.09516153,
    54.27817472,
    55.44378444,
    56.59318756,
    57.72747354,
    58.84763776,
    59.95459277,
    61.04917774,
    62.13216659,
    63.20427479,
    64.26616523,
    65.31845310,
    66.36171008,
    67.39646774,
    68.42322022,
    69.44242631,
    70.45451075,
    71.45986473,
    72.45884545,
    73.45177442,
    74.43893416,
    75.42056257,
    76.39684391,
    77.36789461,
    78.33374083,
    79.29428225,
    80.24923213,
    81.19801349,
    82.13956981,
    83.07199445,
    83.99173563,
    84.89166191,
    85.75541621,
    86.53536998,
    87.00000000,
];

/// Number of longitude zones at a latitude.
pub fn nl(lat: f64) -> u32 {
    let lat = lat.abs();
    for (i, &edge) in NL_EDGES.iter().enumerate() {
        if lat < edge {
            return 59 - i as u32;
        }
    }
    1
}

/// Modulo that always returns a non-negative result.
fn cpr_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r < 0.0 {
        r + b
    } else {
        r
    }
}

fn n_zones(lat: f64, odd: bool) -> u32 {
    (nl(lat) - odd as u32).max(1)
}

/// Longitude zone width in degrees at a latitude.
fn dlon(lat: f64, odd: bool, surface: bool) -> f64 {
    (if surface { 90.0 } else { 360.0 }) / n_zones(lat, odd) as f64
}

/// Global decode from an even/odd sample pair.
///
/// `use_odd` selects which frame supplies the final position (the most
/// recently received one). Surface frames carry a quarter-range encoding and
/// need `reference` to pick the 90-degree quadrant; without one the decode
/// fails. Returns `None` when the two samples straddle a longitude-zone
/// boundary or resolve outside [-90, 90] latitude.
pub fn decode_global(
    even: (u32, u32),
    odd: (u32, u32),
    use_odd: bool,
    surface: bool,
    reference: Option<(f64, f64)>,
) -> Option<(f64, f64)> {
    let air_dlat0 = (if surface { 90.0 } else { 360.0 }) / 60.0;
    let air_dlat1 = (if surface { 90.0 } else { 360.0 }) / 59.0;
    let (lat0, lon0) = (even.0 as f64, even.1 as f64);
    let (lat1, lon1) = (odd.0 as f64, odd.1 as f64);

    // Latitude zone index
    let j = ((59.0 * lat0 - 60.0 * lat1) / CPR_MAX + 0.5).floor();
    let mut rlat0 = air_dlat0 * (cpr_mod(j, 60.0) + lat0 / CPR_MAX);
    let mut rlat1 = air_dlat1 * (cpr_mod(j, 59.0) + lat1 / CPR_MAX);

    if surface {
        // Move from the first quadrant into the reference's
        let (ref_lat, _) = reference?;
        let shift = (ref_lat / 90.0).floor() * 90.0;
        rlat0 += shift;
        rlat1 += shift;
    } else {
        if rlat0 >= 270.0 {
            rlat0 -= 360.0;
        }
        if rlat1 >= 270.0 {
            rlat1 -= 360.0;
        }
    }

    if !(-90.0..=90.0).contains(&rlat0) || !(-90.0..=90.0).contains(&rlat1) {
        return None;
    }

    // Both solutions must sit in the same longitude-zone band
    if nl(rlat0) != nl(rlat1) {
        return None;
    }

    let (rlat, lon_sample) = if use_odd { (rlat1, lon1) } else { (rlat0, lon0) };
    let zones = nl(rlat);
    let m = ((lon0 * (zones - 1) as f64 - lon1 * zones as f64) / CPR_MAX + 0.5).floor();
    let ni = n_zones(rlat, use_odd);
    let mut lon = dlon(rlat, use_odd, surface) * (cpr_mod(m, ni as f64) + lon_sample / CPR_MAX);

    if surface {
        let (_, ref_lon) = reference?;
        lon += (ref_lon / 90.0).floor() * 90.0;
    } else if lon > 180.0 {
        lon -= 360.0;
    }

    Some((rlat, lon))
}

/// Relative decode of a single sample against a reference position.
///
/// Valid while the aircraft is within half a zone of the reference; a
/// candidate further away than that is rejected so the caller can fall back
/// to a different reference.
pub fn decode_relative(
    sample: (u32, u32),
    odd: bool,
    surface: bool,
    reference: (f64, f64),
) -> Option<(f64, f64)> {
    let air_dlat = (if surface { 90.0 } else { 360.0 }) / if odd { 59.0 } else { 60.0 };
    let (lat_r, lon_r) = reference;
    let lat = sample.0 as f64;
    let lon = sample.1 as f64;

    // Coarse zone from the reference, half-cell offset from the sample.
    // The inner term truncates toward zero while the outer index floors;
    // the two must not be merged.
    let j = (lat_r / air_dlat).floor()
        + (0.5 + cpr_mod(lat_r, air_dlat) / air_dlat - lat / CPR_MAX).trunc();
    let mut rlat = air_dlat * (j + lat / CPR_MAX);
    if rlat >= 270.0 {
        rlat -= 360.0;
    }

    if !(-90.0..=90.0).contains(&rlat) {
        return None;
    }
    if (rlat - lat_r).abs() > air_dlat / 2.0 {
        return None;
    }

    let air_dlon = dlon(rlat, odd, surface);
    let m = (lon_r / air_dlon).floor()
        + (0.5 + cpr_mod(lon_r, air_dlon) / air_dlon - lon / CPR_MAX).trunc();
    let mut rlon = air_dlon * (m + lon / CPR_MAX);
    if rlon > 180.0 {
        rlon -= 360.0;
    }

    if (rlon - lon_r).abs() > air_dlon / 2.0 {
        return None;
    }

    Some((rlat, rlon))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nl_equator() {
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(-0.0), 59);
    }

    #[test]
    fn test_nl_poles() {
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-87.0), 1);
        assert_eq!(nl(90.0), 1);
    }

    #[test]
    fn test_nl_band_edges() {
        assert_eq!(nl(10.0), 59);
        assert_eq!(nl(10.5), 58);
        assert_eq!(nl(52.0), 36);
        assert_eq!(nl(-52.0), 36);
        assert_eq!(nl(86.9), 2);
    }

    #[test]
    fn test_global_decode_known_pair() {
        // Published airborne pair for 40621D:
        // even (93000, 51372), odd (74158, 50194) -> 52.2572 N, 3.9194 E
        let pos = decode_global((93000, 51372), (74158, 50194), false, false, None);
        let (lat, lon) = pos.expect("global decode should succeed");
        assert!((lat - 52.2572).abs() < 0.001, "lat {lat}");
        assert!((lon - 3.9194).abs() < 0.001, "lon {lon}");
    }

    #[test]
    fn test_global_decode_odd_frame() {
        let pos = decode_global((93000, 51372), (74158, 50194), true, false, None);
        let (lat, lon) = pos.expect("global decode should succeed");
        assert!((lat - 52.2658).abs() < 0.01, "lat {lat}");
        assert!((lon - 3.92).abs() < 0.05, "lon {lon}");
    }

    #[test]
    fn test_global_decode_zone_mismatch() {
        // Samples for 86.99 (two zones) and 87.01 (one zone): a consistent
        // pair whose candidates straddle the 87 degree band.
        let lat_even = 65318; // 86.99 deg
        let lat_odd = 34075; // 87.01 deg
        let pos = decode_global((lat_even, 0), (lat_odd, 0), false, false, None);
        assert!(pos.is_none(), "zone crossing must abort the decode");
    }

    #[test]
    fn test_global_decode_surface_needs_reference() {
        assert!(decode_global((93000, 51372), (74158, 50194), false, true, None).is_none());
    }

    #[test]
    fn test_global_decode_surface_quadrant() {
        // The same pair decoded as surface with a northern European
        // reference lands in the receiver's quadrant.
        let pos = decode_global(
            (93000, 51372),
            (74158, 50194),
            false,
            true,
            Some((52.0, 4.0)),
        );
        let (lat, lon) = pos.expect("surface decode with reference");
        assert!((0.0..90.0).contains(&lat), "lat {lat}");
        assert!((0.0..90.0).contains(&lon), "lon {lon}");
    }

    #[test]
    fn test_relative_decode_even() {
        let pos = decode_relative((93000, 51372), false, false, (52.25, 3.92));
        let (lat, lon) = pos.expect("relative decode");
        assert!((lat - 52.2572).abs() < 0.001, "lat {lat}");
        assert!((lon - 3.9194).abs() < 0.001, "lon {lon}");
    }

    #[test]
    fn test_relative_decode_odd() {
        let pos = decode_relative((74158, 50194), true, false, (52.25, 3.92));
        let (lat, lon) = pos.expect("relative decode");
        assert!((lat - 52.2658).abs() < 0.01, "lat {lat}");
        assert!((lon - 3.92).abs() < 0.05, "lon {lon}");
    }

    #[test]
    fn test_relative_decode_rejects_distant_candidate() {
        // A sample deep into the next cell relative to the reference: the
        // truncated half-cell offset picks a candidate more than half a
        // zone away, which must be rejected.
        let sample = ((0.9 * CPR_MAX) as u32, 51372);
        assert!(decode_relative(sample, false, false, (0.1, 0.1)).is_none());
    }

    #[test]
    fn test_relative_decode_near_reference_accepts() {
        // Same fractional sample, reference in the matching cell half.
        let sample = ((0.9 * CPR_MAX) as u32, (0.5 * CPR_MAX) as u32);
        let pos = decode_relative(sample, false, false, (5.5, 3.0));
        let (lat, lon) = pos.expect("candidate within half a cell");
        assert!((lat - 5.4).abs() < 0.01, "lat {lat}");
        assert!((lon - 3.0).abs() < 0.1, "lon {lon}");
    }

    #[test]
    fn test_cpr_mod_negative() {
        assert!((cpr_mod(-1.0, 60.0) - 59.0).abs() < 1e-12);
        assert!((cpr_mod(7.0, 3.0) - 1.0).abs() < 1e-12);
    }
}

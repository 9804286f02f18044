//! Interface to the external track consumer.
//!
//! The main loop calls `open` then `init` at startup (an `init` failure is
//! fatal), `post` once per iteration after the staleness sweep, and `close`
//! on the way out. The consumer reads the live track set and can follow up
//! per-aircraft through `Tracker::find_aircraft` and the frame log.

use crate::track::Tracker;
use crate::types::{addr_to_string, Result};

/// Startup parameters handed to the consumer.
#[derive(Debug, Clone, Default)]
pub struct UploaderInit {
    pub user_lat: f64,
    pub user_lon: f64,
    pub auth_code: String,
    pub registration: String,
    pub version: String,
}

pub trait Uploader {
    fn open(&mut self) -> Result<()>;
    fn init(&mut self, init: &UploaderInit) -> Result<()>;
    fn post(&mut self, tracker: &Tracker) -> Result<()>;
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// Logging uploader
// ---------------------------------------------------------------------------

/// Consumer that narrates the track set through the log instead of a
/// network peer. Stands in when no upload destination is configured and
/// doubles as the reference implementation of the calling contract.
#[derive(Debug, Default)]
pub struct LogUploader {
    posts: u64,
}

impl LogUploader {
    pub fn new() -> Self {
        LogUploader::default()
    }
}

impl Uploader for LogUploader {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn init(&mut self, init: &UploaderInit) -> Result<()> {
        log::info!(
            "uploader ready: registration '{}', position {:.4},{:.4}",
            init.registration,
            init.user_lat,
            init.user_lon
        );
        Ok(())
    }

    fn post(&mut self, tracker: &Tracker) -> Result<()> {
        self.posts += 1;
        if self.posts % 60 == 0 {
            log::info!("tracking {} aircraft", tracker.len());
        }
        for aircraft in tracker.tracks() {
            if aircraft.has_position() {
                log::debug!(
                    "{} {} at {:.4},{:.4} alt {} ft",
                    addr_to_string(aircraft.addr),
                    aircraft.callsign.trim(),
                    aircraft.lat,
                    aircraft.lon,
                    aircraft.altitude
                );
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        log::info!("uploader closed after {} posts", self.posts);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dflog::FrameLog;
    use crate::track::{Tracker, DEFAULT_DELETE_TTL, DEFAULT_DISPLAY_TTL};
    use crate::types::ModesMessage;
    use std::sync::Arc;

    /// Uploader that records what it saw, for exercising the call contract.
    #[derive(Default)]
    struct RecordingUploader {
        inits: Vec<UploaderInit>,
        seen_counts: Vec<usize>,
        closed: bool,
    }

    impl Uploader for RecordingUploader {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }
        fn init(&mut self, init: &UploaderInit) -> Result<()> {
            self.inits.push(init.clone());
            Ok(())
        }
        fn post(&mut self, tracker: &Tracker) -> Result<()> {
            self.seen_counts.push(tracker.len());
            Ok(())
        }
        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_post_sees_current_tracks() {
        let mut tracker = Tracker::new(
            None,
            DEFAULT_DELETE_TTL,
            DEFAULT_DISPLAY_TTL,
            Arc::new(FrameLog::new()),
        );
        let mut uploader = RecordingUploader::default();

        uploader.open().unwrap();
        uploader
            .init(&UploaderInit {
                registration: "G-ABCD".into(),
                ..Default::default()
            })
            .unwrap();

        uploader.post(&tracker).unwrap();

        let mut mm = ModesMessage {
            df: 4,
            addr: 0xAAAAAA,
            crc_ok: true,
            ..Default::default()
        };
        tracker.receive(&mut mm, 1.0);
        uploader.post(&tracker).unwrap();

        uploader.close();
        assert_eq!(uploader.seen_counts, vec![0, 1]);
        assert!(uploader.closed);
        assert_eq!(uploader.inits[0].registration, "G-ABCD");
    }

    #[test]
    fn test_log_uploader_contract() {
        let tracker = Tracker::new(
            None,
            DEFAULT_DELETE_TTL,
            DEFAULT_DISPLAY_TTL,
            Arc::new(FrameLog::new()),
        );
        let mut uploader = LogUploader::new();
        uploader.open().unwrap();
        uploader.init(&UploaderInit::default()).unwrap();
        uploader.post(&tracker).unwrap();
        uploader.close();
    }
}

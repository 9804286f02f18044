//! skyfeed-core: Mode S / ADS-B decode and tracking for Beast-fed receivers.
//!
//! No sockets, no CLI — just the pipeline: bytes in from the Beast framing,
//! decoded messages through the parser and address whitelist, positions out
//! of the CPR decoder, live tracks in the tracker, all exposed to an
//! uploader through a narrow read interface.

pub mod beast;
pub mod config;
pub mod cpr;
pub mod crc;
pub mod decode;
pub mod dflog;
pub mod fields;
pub mod track;
pub mod types;
pub mod uploader;

// Re-export commonly used types at crate root
pub use beast::{BeastFrame, BeastSplitter};
pub use config::Config;
pub use crc::IcaoCache;
pub use decode::{decode_message, decode_mode_ac};
pub use dflog::{FrameLog, FrameLogEntry};
pub use track::{Aircraft, Tracker};
pub use types::*;
pub use uploader::{LogUploader, Uploader, UploaderInit};

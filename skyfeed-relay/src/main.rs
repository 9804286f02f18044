//! skyfeed-relay: Beast TCP client feeding the Mode S tracker and uploader.
//!
//! Connects to a Beast source (dump1090 and friends, port 30005), sends the
//! mode handshake, and runs the synchronous hot path: splitter -> decoder ->
//! tracker, with a staleness sweep and an uploader post once per second.
//! Connection loss is never fatal; the relay sleeps a second and redials.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use log::{debug, info, warn};

use skyfeed_core::beast::{BeastSplitter, HANDSHAKE_MODE_AC, HANDSHAKE_MODE_S};
use skyfeed_core::config::{load_station, Config};
use skyfeed_core::decode::{decode_message, decode_mode_ac};
use skyfeed_core::dflog::FrameLog;
use skyfeed_core::track::Tracker;
use skyfeed_core::uploader::{LogUploader, Uploader, UploaderInit};
use skyfeed_core::IcaoCache;

#[derive(Parser)]
#[command(
    name = "skyfeed-relay",
    version,
    about = "Decode a Beast feed into live aircraft tracks"
)]
struct Cli {
    /// Beast source host
    #[arg(long, default_value = "127.0.0.1")]
    beast_host: String,

    /// Beast source port
    #[arg(long, default_value_t = 30005)]
    beast_port: u16,

    /// Disable Mode A/C ingestion
    #[arg(long)]
    no_mode_ac: bool,

    /// Seconds of silence before a track is dropped
    #[arg(long, default_value_t = 300.0)]
    delete_ttl: f64,

    /// Seconds a prior fix stays usable as a surface position reference
    #[arg(long, default_value_t = 60.0)]
    display_ttl: f64,

    /// Receiver latitude in degrees
    #[arg(long, default_value_t = 0.0)]
    lat: f64,

    /// Receiver longitude in degrees
    #[arg(long, default_value_t = 0.0)]
    lon: f64,

    /// Attempt one/two-bit CRC repair on extended squitters
    #[arg(long)]
    fix: bool,

    /// Suppress the startup banner
    #[arg(long)]
    quiet: bool,

    /// Track destination host
    #[arg(long, default_value = "127.0.0.1")]
    uploader_host: String,

    /// Station file with receiver position and uploader credentials
    #[arg(long)]
    station_file: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config {
            mode_ac: !self.no_mode_ac,
            beast_host: self.beast_host,
            beast_port: self.beast_port,
            uploader_host: self.uploader_host,
            delete_ttl: self.delete_ttl,
            display_ttl: self.display_ttl,
            user_lat: self.lat,
            user_lon: self.lon,
            quiet: self.quiet,
            fix_errors: self.fix,
            ..Default::default()
        };
        if let Some(path) = &self.station_file {
            config.apply_station(&load_station(path));
        }
        config
    }
}

fn main() {
    env_logger::init();
    let config = Cli::parse().into_config();

    if !config.quiet {
        eprintln!(
            "skyfeed-relay v{} -- {}:{} ({})",
            env!("CARGO_PKG_VERSION"),
            config.beast_host,
            config.beast_port,
            if config.mode_ac {
                "Mode S + Mode A/C"
            } else {
                "Mode S only"
            }
        );
    }

    let (user_lat, user_lon) = config.user_position().unwrap_or((0.0, 0.0));
    let mut uploader = LogUploader::new();
    let init = UploaderInit {
        user_lat,
        user_lon,
        auth_code: config.auth_code.clone(),
        registration: config.registration.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
    };
    if let Err(e) = uploader.open().and_then(|()| uploader.init(&init)) {
        eprintln!("skyfeed-relay: uploader init failed: {e}");
        std::process::exit(1);
    }

    let exit = Arc::new(AtomicBool::new(false));
    run(&config, &mut uploader, &exit);

    uploader.close();
}

/// Redial loop around the feed. Exits only on the cooperative flag.
fn run(config: &Config, uploader: &mut dyn Uploader, exit: &AtomicBool) {
    let frame_log = Arc::new(FrameLog::new());
    let mut tracker = Tracker::new(
        config.user_position(),
        config.delete_ttl,
        config.display_ttl,
        frame_log,
    );
    let mut cache = IcaoCache::new();

    while !exit.load(Ordering::Relaxed) {
        let target = (config.beast_host.as_str(), config.beast_port);
        match TcpStream::connect(target) {
            Ok(stream) => {
                info!("connected to {}:{}", config.beast_host, config.beast_port);
                if let Err(e) = feed_loop(stream, config, &mut tracker, &mut cache, uploader, exit)
                {
                    warn!("feed lost: {e}");
                }
            }
            Err(e) => warn!(
                "connect to {}:{} failed: {e}",
                config.beast_host, config.beast_port
            ),
        }

        if exit.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// The synchronous hot path over one connection.
fn feed_loop(
    mut stream: TcpStream,
    config: &Config,
    tracker: &mut Tracker,
    cache: &mut IcaoCache,
    uploader: &mut dyn Uploader,
    exit: &AtomicBool,
) -> std::io::Result<()> {
    let handshake = if config.mode_ac {
        HANDSHAKE_MODE_AC
    } else {
        HANDSHAKE_MODE_S
    };
    stream.write_all(&handshake)?;
    // Bounded reads keep the sweep ticking while the feed idles
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut splitter = BeastSplitter::new();
    let mut buf = [0u8; 4096];

    while !exit.load(Ordering::Relaxed) {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()), // closed by peer; the caller redials
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => 0,
            Err(e) => return Err(e),
        };

        let now = unix_now();
        for frame in splitter.feed(&buf[..n]) {
            let mut mm = if frame.is_mode_ac() {
                if !config.mode_ac {
                    continue;
                }
                decode_mode_ac(frame.mode_ac_word(), frame.timestamp, frame.signal_level)
            } else {
                decode_message(
                    &frame.payload,
                    frame.timestamp,
                    frame.signal_level,
                    now,
                    cache,
                    config.fix_errors,
                )
            };
            if tracker.receive(&mut mm, now).is_some() {
                debug!("{} {}", skyfeed_core::df_name(mm.df), mm.hex());
            }
        }

        tracker.remove_stale(now);
        if let Err(e) = uploader.post(tracker) {
            warn!("uploader post failed: {e}");
        }
    }

    Ok(())
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

use crate::sampler::Sampler;
use crate::Reporter;
use anyhow::{anyhow, Result};
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::time::{Duration, Instant};

mod download;
mod roundtrip;
mod upload;

pub use download::download_test;
pub use roundtrip::round_trip_test;
pub use upload::upload_test;

pub const MIN_MESSAGE_SIZE: usize = 1 << 10;
pub const MAX_SCALED_MESSAGE_SIZE: usize = 1 << 20;
pub const MAX_MESSAGE_SIZE: usize = 1 << 24;
pub const MAX_RUNTIME: Duration = Duration::from_secs(10);
pub const MEASURE_INTERVAL: Duration = Duration::from_millis(250);
pub const FRACTION_FOR_SCALING: u64 = 16;

pub const ROUND_TRIP_MAX_MESSAGE_SIZE: usize = 1 << 17;
pub const ROUND_TRIP_RUNTIME: Duration = Duration::from_secs(3);

/// Subprotocol token advertised during the WebSocket handshake.
pub const WS_PROTOCOL: &str = "net.measurementlab.ndt.v7";

const LOCATE_URL: &str = "https://locate.measurementlab.net/v2/nearest/ndt/ndt7";
const LOCATE_DOWNLOAD_KEY: &str = "wss:///ndt/v7/download";
const LOCATE_UPLOAD_KEY: &str = "wss:///ndt/v7/upload";

/// Resolved endpoints and connection options for one run.
pub struct Config {
    pub download: Option<String>,
    pub upload: Option<String>,
    pub round_trip: Option<String>,
    pub no_verify: bool,
}

impl Config {
    /// True when no endpoint was given explicitly, so discovery should run.
    pub fn needs_locate(&self) -> bool {
        self.download.is_none() && self.upload.is_none() && self.round_trip.is_none()
    }
}

#[derive(Deserialize)]
struct LocateResult {
    urls: HashMap<String, String>,
}

#[derive(Deserialize)]
struct LocateResponse {
    results: Vec<LocateResult>,
}

/// Resolve the nearest measurement server into download/upload URLs.
/// The locate v2 API doesn't serve round-trip endpoints, so that test
/// still needs an explicit URL.
pub fn locate(config: &mut Config) -> Result<()> {
    info!("Fetch nearest server from locate.measurementlab.net ...");
    let response: LocateResponse = ureq::get(LOCATE_URL)
        .timeout(Duration::from_secs(10))
        .call()?
        .into_json()?;
    let nearest = response
        .results
        .first()
        .ok_or_else(|| anyhow!("too few entries"))?;
    config.download = nearest.urls.get(LOCATE_DOWNLOAD_KEY).cloned();
    config.upload = nearest.urls.get(LOCATE_UPLOAD_KEY).cloned();
    Ok(())
}

/// Shared bookkeeping for the sampling loops: running byte counter,
/// test start time, and the periodic sampler. The counter and clock are
/// owned by the single active test; there is no concurrent mutation.
pub(crate) struct Progress {
    start: Instant,
    total: u64,
    sampler: Sampler,
}

impl Progress {
    pub(crate) fn new(start: Instant, interval: Duration) -> Progress {
        Progress {
            start,
            total: 0,
            sampler: Sampler::new(interval),
        }
    }

    pub(crate) fn add(&mut self, bytes: usize) {
        self.total += bytes as u64;
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Emit a client-side AppInfo record iff a sampling boundary passed.
    pub(crate) fn sample<W: Write>(&mut self, reporter: &mut Reporter<W>, test: &str) -> Result<()> {
        if self.sampler.due() {
            reporter.app_info(test, self.total, self.elapsed_micros())?;
        }
        Ok(())
    }
}

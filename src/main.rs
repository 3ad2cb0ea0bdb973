use anyhow::Result;
use log::*;
use ndt7_client::ndt7::{self, Config};
use ndt7_client::stream::{dial, DialOptions};
use ndt7_client::{CancelToken, MessageStream, Reporter};
use std::io;
use std::process;
use structopt::StructOpt;

static LOGGER: Logger = Logger;

struct Logger;

// Log lines go to stderr: stdout carries the JSON record stream.
impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }
    fn log(&self, record: &Record) {
        if record.level() == log::Level::Info {
            eprintln!("{}", record.args());
        } else {
            eprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }
    fn flush(&self) {}
}

#[derive(StructOpt)]
#[structopt(about = "Minimal ndt7 speed test client")]
struct Opt {
    /// Download test URL
    #[structopt(long)]
    download: Option<String>,
    /// Upload test URL
    #[structopt(long)]
    upload: Option<String>,
    /// Round trip test URL
    #[structopt(long = "round-trip")]
    round_trip: Option<String>,
    /// Don't verify the server TLS certificate
    #[structopt(long = "no-verify")]
    no_verify: bool,
}

fn main() {
    let opt = Opt::from_args();
    log::set_logger(&LOGGER).expect("Set logger failed");
    log::set_max_level(LevelFilter::Info);
    let mut config = Config {
        download: opt.download,
        upload: opt.upload,
        round_trip: opt.round_trip,
        no_verify: opt.no_verify,
    };
    let cancel = CancelToken::new();
    let mut reporter = Reporter::stdout();
    // No explicit endpoint means a real measurement: discover the
    // nearest server. Otherwise assume a local test setup and only do
    // what was asked for.
    if config.needs_locate() {
        if let Err(e) = ndt7::locate(&mut config) {
            fatal(&mut reporter, "locate", &e);
        }
    }
    if let Some(url) = config.round_trip.clone() {
        run_sub_test(
            &config,
            &mut reporter,
            &cancel,
            "roundtrip",
            &url,
            ndt7::ROUND_TRIP_MAX_MESSAGE_SIZE,
            ndt7::round_trip_test,
        );
    }
    if let Some(url) = config.download.clone() {
        run_sub_test(
            &config,
            &mut reporter,
            &cancel,
            "download",
            &url,
            ndt7::MAX_MESSAGE_SIZE,
            ndt7::download_test,
        );
    }
    if let Some(url) = config.upload.clone() {
        run_sub_test(
            &config,
            &mut reporter,
            &cancel,
            "upload",
            &url,
            ndt7::MAX_MESSAGE_SIZE,
            ndt7::upload_test,
        );
    }
}

/// Dial the endpoint and run one sub-test over its own connection.
/// A dial failure aborts the whole run; an in-test failure only ends
/// this sub-test and the run continues with the next one.
fn run_sub_test<F>(
    config: &Config,
    reporter: &mut Reporter<io::Stdout>,
    cancel: &CancelToken,
    name: &str,
    url: &str,
    max_message_size: usize,
    test: F,
) where
    F: Fn(&mut dyn MessageStream, &mut Reporter<io::Stdout>, &CancelToken) -> Result<()>,
{
    let opts = DialOptions {
        no_verify: config.no_verify,
        max_message_size,
    };
    let mut stream = match dial(url, &opts) {
        Ok(stream) => stream,
        Err(e) => fatal(reporter, name, &e),
    };
    if let Err(e) = test(&mut stream, reporter, cancel) {
        let _ = reporter.failure(name, &e);
    }
}

fn fatal(reporter: &mut Reporter<io::Stdout>, name: &str, err: &anyhow::Error) -> ! {
    let _ = reporter.failure(name, err);
    error!("{}: {}", name, err);
    process::exit(1);
}

use super::{Progress, MAX_MESSAGE_SIZE, MAX_RUNTIME, MEASURE_INTERVAL};
use crate::stream::Payload;
use crate::{CancelToken, MessageStream, Reporter};
use anyhow::Result;
use std::io::Write;
use std::time::{Duration, Instant};

/// Receive binary payload for up to 10 seconds, reporting progress
/// every sampling interval. Text messages are measurements the server
/// formatted itself; they are forwarded verbatim, though their bytes
/// still count toward the total.
pub fn download_test<W: Write>(
    stream: &mut dyn MessageStream,
    reporter: &mut Reporter<W>,
    cancel: &CancelToken,
) -> Result<()> {
    run(stream, reporter, cancel, MEASURE_INTERVAL)
}

fn run<W: Write>(
    stream: &mut dyn MessageStream,
    reporter: &mut Reporter<W>,
    cancel: &CancelToken,
    interval: Duration,
) -> Result<()> {
    let start = Instant::now();
    stream.set_read_deadline(start + MAX_RUNTIME)?;
    stream.set_read_limit(MAX_MESSAGE_SIZE);
    let mut progress = Progress::new(start, interval);
    while !cancel.is_cancelled() {
        match stream.recv()? {
            Payload::Text(text) => {
                progress.add(text.len());
                reporter.passthrough(&text)?;
            }
            Payload::Binary(data) => progress.add(data.len()),
        }
        progress.sample(reporter, "download")?;
    }
    Ok(())
}

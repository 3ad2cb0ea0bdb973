use super::{
    Progress, FRACTION_FOR_SCALING, MAX_RUNTIME, MAX_SCALED_MESSAGE_SIZE, MEASURE_INTERVAL,
    MIN_MESSAGE_SIZE,
};
use crate::{CancelToken, MessageStream, Reporter};
use anyhow::Result;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::io::Write;
use std::time::{Duration, Instant};

/// Write prepared binary messages for up to 10 seconds, reporting
/// progress every sampling interval. The message doubles from 1 KiB
/// toward 1 MiB, but only once the bytes already sent prove the link
/// can carry it (see [`next_size`]).
pub fn upload_test<W: Write>(
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
    stream.set_write_deadline(start + MAX_RUNTIME)?;
    let mut progress = Progress::new(start, interval);
    let mut rng = Xoshiro256Plus::from_entropy();
    let mut size = MIN_MESSAGE_SIZE;
    let mut message = prepared_message(&mut rng, size);
    while !cancel.is_cancelled() {
        stream.send_binary(&message)?;
        progress.add(size);
        progress.sample(reporter, "upload")?;
        let grown = next_size(size, progress.total());
        if grown != size {
            size = grown;
            message = prepared_message(&mut rng, size);
        }
    }
    Ok(())
}

/// Double the message size unless it already reached the 1 MiB soft cap
/// or exceeds 1/16th of the bytes sent so far. The fraction keeps one
/// oversized message from dominating a short test.
fn next_size(size: usize, total_bytes: u64) -> usize {
    if size >= MAX_SCALED_MESSAGE_SIZE || size as u64 >= total_bytes / FRACTION_FOR_SCALING {
        size
    } else {
        size << 1
    }
}

/// Prepared messages are immutable once built; growth allocates a fresh
/// payload instead of resizing the one just written.
fn prepared_message(rng: &mut Xoshiro256Plus, size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rng.fill_bytes(&mut data);
    data
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod ndt7;
pub mod report;
pub mod sampler;
pub mod stream;

pub use report::Reporter;
pub use stream::MessageStream;

/// Cooperative cancellation signal shared between the orchestrator and
/// the running test loop. Checked once per loop iteration; in-flight
/// I/O still runs to completion or deadline before it is observed.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

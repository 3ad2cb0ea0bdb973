use std::time::{Duration, Instant};

/// Non-blocking periodic tick, polled from inside a tight I/O loop.
///
/// `due` never blocks: if the next boundary hasn't passed yet the caller
/// goes straight back to its I/O. A boundary missed because of slow I/O
/// fires once, not once per missed interval.
pub struct Sampler {
    interval: Duration,
    next: Instant,
}

impl Sampler {
    pub fn new(interval: Duration) -> Sampler {
        Sampler {
            interval,
            next: Instant::now() + interval,
        }
    }

    /// True at most once per elapsed interval boundary.
    pub fn due(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.next {
            self.next = now + self.interval;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_due_before_interval() {
        let mut sampler = Sampler::new(Duration::from_secs(3600));
        assert!(!sampler.due());
        assert!(!sampler.due());
    }

    #[test]
    fn zero_interval_is_always_due() {
        let mut sampler = Sampler::new(Duration::ZERO);
        assert!(sampler.due());
        assert!(sampler.due());
    }

    #[test]
    fn tick_is_consumed_once() {
        let mut sampler = Sampler::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(sampler.due());
        // the 5ms stall does not queue extra fires
        assert!(!sampler.due());
    }
}

//! Progress throttling.
//!
//! A transcode reports progress far more often than observers need it. A
//! [`ProgressThrottle`] sits between the two for a single job and limits
//! delivery to one update per window, with two guarantees:
//!
//! - after a quiet period of at least one window, the next sample goes out
//!   immediately (leading edge);
//! - a burst inside a window is collapsed to its *latest* sample, which goes
//!   out when the window closes (trailing edge).
//!
//! The throttle is a plain state machine: it never sleeps or spawns. Callers
//! feed it samples with their arrival time and arm a timer when told to; when
//! the timer fires they call [`ProgressThrottle::fire`] with the generation
//! they were given. A fire for an older generation is a no-op, so a timer
//! that loses a race with a fresh delivery cannot flush the wrong sample.
//!
//! Terminal events never pass through here; the owner drops the throttle
//! when a job finishes.

use mediashelf_common::ConversionJobId;
use std::time::{Duration, Instant};

/// Default delivery window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// One progress callback from the transcoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub job_id: ConversionJobId,
    pub percent: f64,
    pub at: Instant,
}

/// What the caller must do with a sample it offered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Deliver the sample now. Any timer the caller holds for this job is
    /// obsolete and may be dropped.
    Deliver(ProgressSample),
    /// The sample is held. Arm a timer for `delay` and call
    /// [`ProgressThrottle::fire`] with `generation` when it expires.
    Arm { delay: Duration, generation: u64 },
    /// The sample replaced the held one; the armed timer stands.
    Coalesced,
}

/// Per-job throttle state.
#[derive(Debug)]
pub struct ProgressThrottle {
    window: Duration,
    last_delivery: Option<Instant>,
    pending: Option<ProgressSample>,
    /// `Some(generation)` while a timer is armed.
    armed: Option<u64>,
    generation: u64,
}

impl ProgressThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_delivery: None,
            pending: None,
            armed: None,
            generation: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn pending(&self) -> Option<&ProgressSample> {
        self.pending.as_ref()
    }

    /// Offer a sample that arrived at `sample.at`.
    ///
    /// The elapsed-window check runs first, even while a timer is armed: a
    /// sample arriving at or past the window boundary is delivered at once and
    /// supersedes the held one.
    pub fn offer(&mut self, sample: ProgressSample) -> Admission {
        let now = sample.at;
        let elapsed = self
            .last_delivery
            .map(|last| now.saturating_duration_since(last));

        match elapsed {
            None => self.deliver(sample),
            Some(elapsed) if elapsed >= self.window => self.deliver(sample),
            Some(elapsed) => {
                self.pending = Some(sample);
                if self.armed.is_some() {
                    Admission::Coalesced
                } else {
                    self.generation += 1;
                    self.armed = Some(self.generation);
                    Admission::Arm {
                        delay: self.window - elapsed,
                        generation: self.generation,
                    }
                }
            }
        }
    }

    /// Timer expiry for `generation`. Returns the sample to deliver, if any.
    pub fn fire(&mut self, generation: u64, now: Instant) -> Option<ProgressSample> {
        if self.armed != Some(generation) {
            return None;
        }
        self.armed = None;

        let sample = self.pending.take()?;
        self.last_delivery = Some(now);
        Some(sample)
    }

    fn deliver(&mut self, sample: ProgressSample) -> Admission {
        self.last_delivery = Some(sample.at);
        self.pending = None;
        self.armed = None;
        Admission::Deliver(sample)
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    struct Clock {
        start: Instant,
        job_id: ConversionJobId,
    }

    impl Clock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                job_id: ConversionJobId::new(),
            }
        }

        fn at(&self, t: u64) -> Instant {
            self.start + secs(t)
        }

        fn sample(&self, t: u64, percent: f64) -> ProgressSample {
            ProgressSample {
                job_id: self.job_id,
                percent,
                at: self.at(t),
            }
        }
    }

    #[test]
    fn first_sample_is_delivered_immediately() {
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();

        let sample = clock.sample(0, 10.0);
        assert_eq!(throttle.offer(sample), Admission::Deliver(sample));
        assert!(!throttle.is_armed());
    }

    #[test]
    fn arrival_past_window_supersedes_armed_flush() {
        // The armed timer is never fired here. With a live timer the held
        // 50% goes out at t=10 instead; see the queue's throttling test.
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();
        let mut delivered = Vec::new();

        for (t, pct) in [(0, 10.0), (2, 20.0), (4, 30.0), (6, 40.0), (8, 50.0), (11, 60.0)] {
            if let Admission::Deliver(s) = throttle.offer(clock.sample(t, pct)) {
                delivered.push((s.at, s.percent));
            }
        }

        assert_eq!(delivered, vec![(clock.at(0), 10.0), (clock.at(11), 60.0)]);
        assert!(!throttle.is_armed());
        assert!(throttle.pending().is_none());
    }

    #[test]
    fn timer_is_armed_once_per_window() {
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();

        throttle.offer(clock.sample(0, 10.0));
        let admission = throttle.offer(clock.sample(2, 20.0));
        assert_eq!(
            admission,
            Admission::Arm {
                delay: secs(8),
                generation: 1
            }
        );

        // Later samples in the window do not re-schedule.
        assert_eq!(throttle.offer(clock.sample(4, 30.0)), Admission::Coalesced);
        assert_eq!(throttle.offer(clock.sample(8, 50.0)), Admission::Coalesced);
        assert_eq!(throttle.pending().map(|s| s.percent), Some(50.0));
    }

    #[test]
    fn timer_flushes_latest_pending_sample() {
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();

        throttle.offer(clock.sample(0, 10.0));
        let Admission::Arm { generation, .. } = throttle.offer(clock.sample(2, 20.0)) else {
            panic!("expected the throttle to arm");
        };
        throttle.offer(clock.sample(5, 35.0));

        let flushed = throttle.fire(generation, clock.at(10)).unwrap();
        assert_eq!(flushed.percent, 35.0);
        assert!(!throttle.is_armed());

        // The window restarts from the flush, not from the last arrival.
        assert_eq!(
            throttle.offer(clock.sample(12, 40.0)),
            Admission::Arm {
                delay: secs(8),
                generation: 2
            }
        );
    }

    #[test]
    fn leading_edge_after_idle_period() {
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();

        throttle.offer(clock.sample(0, 10.0));
        let sample = clock.sample(25, 70.0);
        assert_eq!(throttle.offer(sample), Admission::Deliver(sample));
    }

    #[test]
    fn sample_exactly_on_boundary_is_delivered() {
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();

        throttle.offer(clock.sample(0, 10.0));
        let Admission::Arm { generation, .. } = throttle.offer(clock.sample(3, 20.0)) else {
            panic!("expected the throttle to arm");
        };

        // Arrives at t=10 before the timer has been processed.
        let boundary = clock.sample(10, 30.0);
        assert_eq!(throttle.offer(boundary), Admission::Deliver(boundary));

        // The now-late timer finds nothing to do.
        assert_eq!(throttle.fire(generation, clock.at(10)), None);
    }

    #[test]
    fn stale_generation_cannot_flush_newer_window() {
        let clock = Clock::new();
        let mut throttle = ProgressThrottle::default();

        throttle.offer(clock.sample(0, 10.0));
        let Admission::Arm { generation: old, .. } = throttle.offer(clock.sample(1, 20.0)) else {
            panic!("expected the throttle to arm");
        };
        throttle.offer(clock.sample(11, 30.0));
        let Admission::Arm { generation: new, .. } = throttle.offer(clock.sample(12, 40.0)) else {
            panic!("expected the throttle to re-arm");
        };

        assert_ne!(old, new);
        assert_eq!(throttle.fire(old, clock.at(12)), None);
        assert_eq!(throttle.pending().map(|s| s.percent), Some(40.0));
        assert_eq!(
            throttle.fire(new, clock.at(21)).map(|s| s.percent),
            Some(40.0)
        );
    }

    #[test]
    fn fire_without_pending_sample_is_noop() {
        let mut throttle = ProgressThrottle::new(secs(1));
        assert_eq!(throttle.fire(0, Instant::now()), None);
        assert_eq!(throttle.window(), secs(1));
    }
}

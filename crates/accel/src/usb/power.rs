//! Reference-counted power sequencing
//!
//! Owned by the power/attach task, so the count is only ever touched from
//! that task's thread. The power rail and the reset line follow `count > 0`.

use crate::usb::host::PowerLines;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PowerSequencer {
    lines: Box<dyn PowerLines>,
    count: u32,
    poll_interval: Duration,
}

impl PowerSequencer {
    /// Wrap the board lines, driving both low
    pub fn new(mut lines: Box<dyn PowerLines>, poll_interval: Duration) -> Self {
        lines.set_reset_line(false);
        lines.set_power_enable(false);

        Self {
            lines,
            count: 0,
            poll_interval,
        }
    }

    /// Add or drop one power reference
    ///
    /// The first reference powers the accelerator up and the last one powers
    /// it down. Dropping a reference at zero is a no-op.
    pub fn set_power(&mut self, enable: bool) {
        if enable {
            self.count += 1;
            debug!("Power reference acquired (count {})", self.count);
            if self.count == 1 {
                self.power_up();
            }
        } else if self.count == 0 {
            warn!("Power release without a matching acquire, ignored");
        } else {
            self.count -= 1;
            debug!("Power reference released (count {})", self.count);
            if self.count == 0 {
                self.power_down();
            }
        }
    }

    pub fn is_on(&self) -> bool {
        self.count > 0
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn power_up(&mut self) {
        info!("Powering accelerator up");
        self.lines.set_power_enable(true);

        // No timeout: a rail that never comes good wedges this task.
        while !self.lines.power_good() {
            if self.poll_interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.poll_interval);
            }
        }

        self.lines.set_reset_line(true);
        debug!("Power good, reset released");
    }

    fn power_down(&mut self) {
        info!("Powering accelerator down");
        self.lines.set_reset_line(false);
        self.lines.set_power_enable(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Lines {
        power: bool,
        reset_high: bool,
        good_after: u32,
        polls: u32,
        /// (power, reset) after every write
        history: Vec<(bool, bool)>,
    }

    #[derive(Clone, Default)]
    struct FakeLines(Arc<Mutex<Lines>>);

    impl PowerLines for FakeLines {
        fn set_power_enable(&mut self, enabled: bool) {
            let mut l = self.0.lock().unwrap();
            l.power = enabled;
            l.polls = 0;
            let snapshot = (l.power, l.reset_high);
            l.history.push(snapshot);
        }

        fn power_good(&self) -> bool {
            let mut l = self.0.lock().unwrap();
            l.polls += 1;
            l.power && l.polls > l.good_after
        }

        fn set_reset_line(&mut self, high: bool) {
            let mut l = self.0.lock().unwrap();
            // Reset must never be released on an unpowered rail.
            assert!(!high || l.power);
            l.reset_high = high;
            let snapshot = (l.power, l.reset_high);
            l.history.push(snapshot);
        }
    }

    fn sequencer(good_after: u32) -> (PowerSequencer, FakeLines) {
        let lines = FakeLines::default();
        lines.0.lock().unwrap().good_after = good_after;
        let seq = PowerSequencer::new(Box::new(lines.clone()), Duration::ZERO);
        (seq, lines)
    }

    #[test]
    fn test_reset_released_after_power_good() {
        let (mut seq, lines) = sequencer(5);
        seq.set_power(true);

        let l = lines.0.lock().unwrap();
        assert!(l.power);
        assert!(l.reset_high);
        assert!(l.polls > 5);
        assert_eq!(l.history.last(), Some(&(true, true)));
    }

    #[test]
    fn test_power_down_asserts_reset_first() {
        let (mut seq, lines) = sequencer(0);
        seq.set_power(true);
        seq.set_power(false);

        let l = lines.0.lock().unwrap();
        let n = l.history.len();
        assert_eq!(l.history[n - 2], (true, false));
        assert_eq!(l.history[n - 1], (false, false));
    }

    #[test]
    fn test_release_at_zero_saturates() {
        let (mut seq, lines) = sequencer(0);
        seq.set_power(false);
        seq.set_power(false);
        assert_eq!(seq.count(), 0);

        seq.set_power(true);
        assert!(seq.is_on());
        assert!(lines.0.lock().unwrap().power);
    }

    #[test]
    fn test_nested_references_keep_power() {
        let (mut seq, lines) = sequencer(0);
        seq.set_power(true);
        seq.set_power(true);
        seq.set_power(false);

        assert!(seq.is_on());
        assert!(lines.0.lock().unwrap().reset_high);
    }

    proptest! {
        #[test]
        fn prop_lines_track_reference_count(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let (mut seq, lines) = sequencer(1);
            let mut expected: u32 = 0;

            for enable in ops {
                seq.set_power(enable);
                expected = if enable { expected + 1 } else { expected.saturating_sub(1) };

                let l = lines.0.lock().unwrap();
                prop_assert_eq!(seq.count(), expected);
                prop_assert_eq!(l.power, expected > 0);
                prop_assert_eq!(l.reset_high, expected > 0);
            }
        }
    }
}

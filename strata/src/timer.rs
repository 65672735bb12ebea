// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU timing of the frame stages.

use std::time::Duration;

use crate::device::{Device, Timer};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Running,
    /// Ended, with the measurement not yet collected.
    Waiting,
}

/// A timer that measures at most one interval at a time.
///
/// `begin` is ignored until the previous measurement was collected, so a
/// slow GPU drops measurements instead of queuing them.
#[derive(Debug)]
pub(crate) struct StageTimer<T> {
    timer: T,
    state: State,
    elapsed: Duration,
}

impl<T: Timer> StageTimer<T> {
    fn new(timer: T) -> Self {
        Self {
            timer,
            state: State::Idle,
            elapsed: Duration::ZERO,
        }
    }

    pub fn begin(&mut self) {
        if self.state != State::Idle {
            return;
        }
        self.timer.begin();
        self.state = State::Running;
    }

    pub fn end(&mut self) {
        if self.state != State::Running {
            return;
        }
        self.timer.end();
        self.state = State::Waiting;
    }

    /// The last collected measurement.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Collects a pending measurement. Returns false if one is still
    /// outstanding.
    fn collect(&mut self) -> bool {
        match self.state {
            State::Idle => true,
            State::Running => false,
            State::Waiting => match self.timer.duration() {
                Some(d) => {
                    self.elapsed = d;
                    self.state = State::Idle;
                    true
                }
                None => false,
            },
        }
    }
}

/// Frame stages with their own timer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Stage {
    Compact,
    Render,
    Blit,
}

/// Timers for the stages of a frame.
#[derive(Debug)]
pub(crate) struct Timers<T> {
    compact: StageTimer<T>,
    render: StageTimer<T>,
    blit: StageTimer<T>,
}

impl<T: Timer> Timers<T> {
    pub fn new<D: Device<Timer = T>>(ctx: &mut D) -> Self {
        Self {
            compact: StageTimer::new(ctx.new_timer()),
            render: StageTimer::new(ctx.new_timer()),
            blit: StageTimer::new(ctx.new_timer()),
        }
    }

    pub fn stage(&mut self, stage: Stage) -> &mut StageTimer<T> {
        match stage {
            Stage::Compact => &mut self.compact,
            Stage::Render => &mut self.render,
            Stage::Blit => &mut self.blit,
        }
    }

    /// Collects every pending measurement, and reports whether all of them
    /// are available and valid.
    pub fn ready(&mut self, time_continuous: bool) -> bool {
        for t in [&mut self.compact, &mut self.render, &mut self.blit] {
            if !t.collect() {
                return false;
            }
        }
        time_continuous
    }

    /// Formats the last measurements for display.
    pub fn summary(&self) -> String {
        let q = |d: Duration| round(d, Duration::from_micros(100));
        let (com, ren, blit) = (
            q(self.compact.elapsed()),
            q(self.render.elapsed()),
            q(self.blit.elapsed()),
        );
        let ft = q(self.compact.elapsed() + self.render.elapsed() + self.blit.elapsed());
        format!(
            "ft:{:>7} com: {:>7} ren:{:>7} blit:{:>7}",
            format!("{ft:?}"),
            format!("{com:?}"),
            format!("{ren:?}"),
            format!("{blit:?}")
        )
    }
}

/// Rounds `d` to the nearest multiple of `q`, halfway away from zero.
fn round(d: Duration, q: Duration) -> Duration {
    let (d, q) = (d.as_nanos(), q.as_nanos());
    let rounded = (d + q / 2) / q * q;
    Duration::from_nanos(rounded as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct FakeTimer {
        begun: u32,
        ended: u32,
        result: Option<Duration>,
    }

    impl Timer for FakeTimer {
        fn begin(&mut self) {
            self.begun += 1;
        }
        fn end(&mut self) {
            self.ended += 1;
        }
        fn duration(&mut self) -> Option<Duration> {
            self.result
        }
    }

    fn timers() -> Timers<FakeTimer> {
        Timers {
            compact: StageTimer::new(FakeTimer::default()),
            render: StageTimer::new(FakeTimer::default()),
            blit: StageTimer::new(FakeTimer::default()),
        }
    }

    #[test]
    fn wrong_state_transitions_are_ignored() {
        let mut t = StageTimer::new(FakeTimer::default());
        t.end();
        assert_eq!(t.timer.ended, 0);
        t.begin();
        t.begin();
        assert_eq!(t.timer.begun, 1);
        t.end();
        // Not collected yet.
        t.begin();
        assert_eq!(t.timer.begun, 1);
        assert_eq!(t.state, State::Waiting);
    }

    #[test]
    fn ready_waits_for_every_timer() {
        let mut t = timers();
        t.stage(Stage::Render).begin();
        assert!(!t.ready(true));
        t.stage(Stage::Render).end();
        assert!(!t.ready(true));
        t.render.timer.result = Some(Duration::from_micros(1260));
        assert!(!t.ready(false));
        assert_eq!(t.render.elapsed(), Duration::from_micros(1260));
        assert!(t.ready(true));
    }

    #[test]
    fn summary_rounds_to_100us() {
        let mut t = timers();
        t.compact.elapsed = Duration::from_micros(449);
        t.render.elapsed = Duration::from_micros(1260);
        t.blit.elapsed = Duration::from_micros(50);
        assert_eq!(
            t.summary(),
            "ft:  1.8ms com:   400µs ren:  1.3ms blit:  100µs"
        );
    }
}

//! Bidirectional transitions on a shared frame clock.
//!
//! Reference model of the transition runtime the generated intro/outro code
//! drives. A transition knows its progress and direction at all times, so a
//! block re-entered mid-outro resumes its intro from where the outro left it.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Animation-frame time base shared by every transition of a component tree.
#[derive(Debug, Clone, Default)]
pub struct FrameClock(Rc<Cell<f64>>);

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.0.get()
    }

    pub fn advance(&self, ms: f64) {
        self.0.set(self.0.get() + ms);
    }

    pub fn set(&self, now: f64) {
        self.0.set(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Idle,
}

impl Direction {
    fn target(self) -> Option<f64> {
        match self {
            Direction::In => Some(1.0),
            Direction::Out => Some(0.0),
            Direction::Idle => None,
        }
    }
}

pub struct Transition {
    clock: FrameClock,
    duration: f64,
    progress: f64,
    direction: Direction,
    start_time: f64,
    end_time: f64,
    start_progress: f64,
    on_complete: Option<Box<dyn FnOnce()>>,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("progress", &self.progress)
            .field("direction", &self.direction)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .finish()
    }
}

impl Transition {
    /// A transition that starts fully out (progress 0).
    pub fn new(clock: FrameClock, duration: f64) -> Self {
        let now = clock.now();
        Transition {
            clock,
            duration: duration.max(0.0),
            progress: 0.0,
            direction: Direction::Idle,
            start_time: now,
            end_time: now,
            start_progress: 0.0,
            on_complete: None,
        }
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_running(&self) -> bool {
        self.direction != Direction::Idle
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn run(&mut self, target: Direction) {
        self.start(target, None);
    }

    /// Run towards `target`; `on_complete` fires once when it gets there.
    pub fn run_with(&mut self, target: Direction, on_complete: impl FnOnce() + 'static) {
        self.start(target, Some(Box::new(on_complete)));
    }

    fn start(&mut self, target: Direction, on_complete: Option<Box<dyn FnOnce()>>) {
        let Some(goal) = target.target() else {
            self.abort();
            return;
        };
        if self.direction == target {
            if on_complete.is_some() {
                self.on_complete = on_complete;
            }
            return;
        }
        // Reversal takes effect now, from wherever the previous run got to.
        self.abort();
        let now = self.clock.now();
        let distance = (goal - self.progress).abs();
        self.direction = target;
        self.start_time = now;
        self.end_time = now + self.duration * distance;
        self.start_progress = self.progress;
        self.on_complete = on_complete;
        tracing::trace!(?target, from = self.progress, until = self.end_time, "transition run");
    }

    /// Stop where it is. A pending completion is dropped without firing.
    pub fn abort(&mut self) {
        if self.direction == Direction::Idle {
            return;
        }
        self.sample(self.clock.now());
        self.direction = Direction::Idle;
        self.on_complete = None;
    }

    /// Advance to `now`; fires the completion callback when the run ends.
    pub fn tick(&mut self, now: f64) -> f64 {
        if self.direction == Direction::Idle {
            return self.progress;
        }
        if self.sample(now) {
            self.direction = Direction::Idle;
            if let Some(done) = self.on_complete.take() {
                done();
            }
        }
        self.progress
    }

    fn sample(&mut self, now: f64) -> bool {
        let Some(goal) = self.direction.target() else {
            return true;
        };
        let span = self.end_time - self.start_time;
        let t = if span <= 0.0 {
            1.0
        } else {
            ((now - self.start_time) / span).clamp(0.0, 1.0)
        };
        self.progress = self.start_progress + (goal - self.start_progress) * t;
        t >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl FnOnce() + 'static) {
        let count = Rc::new(Cell::new(0));
        let inner = count.clone();
        (count, move || inner.set(inner.get() + 1))
    }

    #[test]
    fn test_intro_completes_once() {
        let clock = FrameClock::new();
        let mut t = Transition::new(clock.clone(), 100.0);
        let (fired, done) = counter();
        t.run_with(Direction::In, done);
        assert!(t.is_running());
        clock.advance(40.0);
        assert!((t.tick(clock.now()) - 0.4).abs() < 1e-9);
        clock.advance(60.0);
        assert_eq!(t.tick(clock.now()), 1.0);
        t.tick(clock.now() + 10.0);
        assert_eq!(fired.get(), 1);
        assert!(!t.is_running());
    }

    #[test]
    fn test_reentry_resumes_from_current_progress() {
        let clock = FrameClock::new();
        let mut t = Transition::new(clock.clone(), 100.0);
        t.run(Direction::In);
        clock.advance(100.0);
        t.tick(clock.now());

        let (outro_done, done) = counter();
        t.run_with(Direction::Out, done);
        clock.advance(50.0);
        assert!((t.tick(clock.now()) - 0.5).abs() < 1e-9);

        // Re-entered at 50%: the intro starts from 0.5, not 0.
        t.run(Direction::In);
        assert_eq!(t.direction(), Direction::In);
        assert!((t.progress() - 0.5).abs() < 1e-9);
        assert_eq!(t.end_time(), 200.0);
        clock.advance(25.0);
        assert!((t.tick(clock.now()) - 0.75).abs() < 1e-9);
        clock.advance(25.0);
        assert_eq!(t.tick(clock.now()), 1.0);

        // The cancelled outro never completes, so its block is never destroyed.
        assert_eq!(outro_done.get(), 0);
    }

    #[test]
    fn test_siblings_share_clock() {
        let clock = FrameClock::new();
        let mut a = Transition::new(clock.clone(), 100.0);
        let mut b = Transition::new(clock.clone(), 200.0);
        a.run(Direction::In);
        b.run(Direction::In);
        clock.set(50.0);
        let now = clock.now();
        assert!((a.tick(now) - 0.5).abs() < 1e-9);
        assert!((b.tick(now) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration_completes_on_next_tick() {
        let clock = FrameClock::new();
        let mut t = Transition::new(clock.clone(), 0.0);
        let (fired, done) = counter();
        t.run_with(Direction::In, done);
        assert_eq!(t.tick(clock.now()), 1.0);
        assert_eq!(fired.get(), 1);
    }
}

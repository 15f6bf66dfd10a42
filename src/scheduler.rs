//! Batched update turn.
//!
//! Reference model of the scheduling the generated program relies on:
//! invalidations made during one synchronous turn collect into a changed set
//! and a single flush is requested from the host. The flush runs reactive
//! statements in analysed order, patches once, then samples transitions at a
//! single clock reading.

use crate::deps::{DepSet, DependencyInfo};
use crate::host::Host;
use crate::transition::FrameClock;

/// What the scheduler drives during a flush.
pub trait Component {
    /// Run reactive statement `index`; returns the names it invalidated.
    fn run_reactive(&mut self, index: usize) -> Vec<String>;
    fn patch(&mut self, changed: &DepSet);
    fn tick(&mut self, now: f64);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Reactive statements that ran, in execution order.
    pub ran: Vec<usize>,
    pub changed: DepSet,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    order: Vec<usize>,
    reads: Vec<DepSet>,
    changed: DepSet,
    scheduled: bool,
    clock: FrameClock,
}

impl Scheduler {
    pub fn new(info: &DependencyInfo, clock: FrameClock) -> Self {
        Scheduler {
            order: info.order.clone(),
            reads: info.reactive_reads.clone(),
            changed: DepSet::new(),
            scheduled: false,
            clock,
        }
    }

    pub fn changed(&self) -> &DepSet {
        &self.changed
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Mark `name` changed. Only the first invalidation of a turn asks the host
    /// for a flush.
    pub fn invalidate<H: Host>(&mut self, name: &str, host: &mut H) {
        self.changed.insert(name.to_string());
        if !self.scheduled {
            self.scheduled = true;
            host.schedule_flush();
        }
    }

    /// Run every reactive statement once in order, as on component init.
    pub fn initialize<C: Component>(&mut self, component: &mut C) -> Vec<usize> {
        for &i in &self.order {
            component.run_reactive(i);
        }
        self.order.clone()
    }

    pub fn flush<C: Component>(&mut self, component: &mut C) -> FlushReport {
        let mut changed = std::mem::take(&mut self.changed);
        self.scheduled = false;
        if changed.is_empty() {
            return FlushReport::default();
        }

        let mut ran = Vec::new();
        for &i in &self.order {
            if self.reads[i].is_disjoint(&changed) {
                continue;
            }
            ran.push(i);
            changed.extend(component.run_reactive(i));
        }

        component.patch(&changed);
        component.tick(self.clock.now());
        tracing::trace!(?ran, ?changed, "flushed");
        FlushReport { ran, changed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;

    /// `$: c = b * 2` then `$: b = a + 1`, analysed into order [1, 0].
    struct Doubler {
        a: i64,
        b: i64,
        c: i64,
        patches: Vec<DepSet>,
        ticks: Vec<f64>,
    }

    impl Component for Doubler {
        fn run_reactive(&mut self, index: usize) -> Vec<String> {
            match index {
                0 => {
                    self.c = self.b * 2;
                    vec!["c".into()]
                }
                _ => {
                    self.b = self.a + 1;
                    vec!["b".into()]
                }
            }
        }

        fn patch(&mut self, changed: &DepSet) {
            self.patches.push(changed.clone());
        }

        fn tick(&mut self, now: f64) {
            self.ticks.push(now);
        }
    }

    fn info() -> DependencyInfo {
        let mut info = DependencyInfo::default();
        info.order = vec![1, 0];
        info.reactive_reads = vec![["b".to_string()].into(), ["a".to_string()].into()];
        info.reactive_writes = vec![["c".to_string()].into(), ["b".to_string()].into()];
        info
    }

    #[test]
    fn test_batched_turn() {
        let clock = FrameClock::new();
        clock.set(16.0);
        let mut host = MemoryHost::new();
        let mut scheduler = Scheduler::new(&info(), clock);
        let mut component = Doubler { a: 1, b: 0, c: 0, patches: vec![], ticks: vec![] };

        component.a = 2;
        scheduler.invalidate("a", &mut host);
        component.a = 3;
        scheduler.invalidate("a", &mut host);
        assert_eq!(host.flush_requests, 1);

        let report = scheduler.flush(&mut component);
        assert_eq!(report.ran, vec![1, 0]);
        assert_eq!((component.b, component.c), (4, 8));
        assert_eq!(component.patches.len(), 1);
        assert!(component.patches[0].contains("c"));
        assert_eq!(component.ticks, vec![16.0]);
        assert!(!scheduler.is_scheduled());
    }

    #[test]
    fn test_unrelated_change_skips_statements() {
        let mut host = MemoryHost::new();
        let mut scheduler = Scheduler::new(&info(), FrameClock::new());
        let mut component = Doubler { a: 1, b: 0, c: 0, patches: vec![], ticks: vec![] };
        scheduler.invalidate("b", &mut host);
        let report = scheduler.flush(&mut component);
        assert_eq!(report.ran, vec![0]);
        assert_eq!(component.c, 0);
        assert_eq!(scheduler.flush(&mut component), FlushReport::default());
    }

    #[test]
    fn test_initialize_runs_in_order() {
        let mut scheduler = Scheduler::new(&info(), FrameClock::new());
        let mut component = Doubler { a: 1, b: 0, c: 0, patches: vec![], ticks: vec![] };
        assert_eq!(scheduler.initialize(&mut component), vec![1, 0]);
        assert_eq!(component.c, 4);
    }
}

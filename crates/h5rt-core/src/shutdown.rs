//! Dependency-ordered shutdown engine.
//!
//! A [`ShutdownPlan`] is an ordered list of phases, each a list of term
//! steps. One sweep walks the phases in order; every step of a phase runs,
//! but a phase is only entered when all earlier phases of the same sweep
//! reported zero pending work. Sweeps repeat until a sweep reports nothing
//! pending or [`MAX_SHUTDOWN_SWEEPS`] is reached.
//!
//! Soft circular dependencies (tearing down A releases something B was
//! holding) are resolved by the repetition rather than by an explicit graph.

use std::fmt;
use std::sync::Arc;

use crate::error::LibError;
use crate::subsystem::{SubsystemId, SubsystemTable};

/// Hard cap on sweeps per termination.
pub const MAX_SHUTDOWN_SWEEPS: usize = 100;

/// Capacity of the accumulated non-quiescent summary.
pub const SUMMARY_CAPACITY: usize = 1024;

/// A term hook: returns pending work, zero when quiescent.
pub type TermHook = Arc<dyn Fn() -> usize + Send + Sync>;

/// One hook in a phase.
#[derive(Clone)]
pub struct TermStep {
    label: &'static str,
    debug_package: Option<&'static str>,
    hook: TermHook,
}

impl fmt::Debug for TermStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermStep")
            .field("label", &self.label)
            .field("debug_package", &self.debug_package)
            .finish_non_exhaustive()
    }
}

impl TermStep {
    pub fn new(label: &'static str, hook: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        Self {
            label,
            debug_package: None,
            hook: Arc::new(hook),
        }
    }

    #[must_use]
    pub fn with_debug_package(mut self, package: &'static str) -> Self {
        self.debug_package = Some(package);
        self
    }

    /// `term_package` of a table entry.
    #[must_use]
    pub fn package(table: &SubsystemTable, id: SubsystemId) -> Self {
        let subsystem = Arc::clone(table.get(id));
        Self {
            label: id.name(),
            debug_package: id.debug_package(),
            hook: Arc::new(move || subsystem.term_package()),
        }
    }

    /// `term_top` of a table entry, labelled `<ID>_top`.
    #[must_use]
    pub fn top(table: &SubsystemTable, id: SubsystemId) -> Self {
        let subsystem = Arc::clone(table.get(id));
        Self {
            label: top_label(id),
            debug_package: id.debug_package(),
            hook: Arc::new(move || subsystem.term_top()),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn debug_package(&self) -> Option<&'static str> {
        self.debug_package
    }

    fn call(&self) -> usize {
        (self.hook)()
    }
}

const fn top_label(id: SubsystemId) -> &'static str {
    match id {
        SubsystemId::A => "A_top",
        SubsystemId::D => "D_top",
        SubsystemId::G => "G_top",
        SubsystemId::M => "M_top",
        SubsystemId::S => "S_top",
        SubsystemId::T => "T_top",
        other => other.name(),
    }
}

/// A gated group of steps.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: &'static str,
    pub steps: Vec<TermStep>,
}

/// Receives per-step results while a plan runs.
pub trait SweepObserver {
    fn step_done(&mut self, _sweep: usize, _step: &TermStep, _pending: usize) {}
    fn sweep_done(&mut self, _sweep: usize, _pending: usize) {}
}

impl SweepObserver for () {}

/// Outcome of [`ShutdownPlan::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sweeps executed.
    pub sweeps: usize,
    /// The last sweep reported nothing pending.
    pub converged: bool,
    /// Total pending work reported by the last sweep.
    pub pending: usize,
    /// Steps that reported pending work in the last sweep.
    pub stuck: Vec<&'static str>,
    /// Every non-quiescent step across all sweeps, comma separated and
    /// truncated with `...` at [`SUMMARY_CAPACITY`].
    pub summary: String,
}

impl ShutdownReport {
    /// Error describing a non-converged run.
    #[must_use]
    pub fn diverged_error(&self) -> LibError {
        LibError::ShutdownDiverged {
            sweeps: self.sweeps,
            stuck: self.stuck.join(","),
        }
    }
}

#[derive(Default)]
struct Summary {
    text: String,
    truncated: bool,
}

impl Summary {
    fn push(&mut self, label: &str) {
        if self.truncated {
            return;
        }
        let sep = usize::from(!self.text.is_empty());
        if self.text.len() + sep + label.len() + 3 < SUMMARY_CAPACITY {
            if sep == 1 {
                self.text.push(',');
            }
            self.text.push_str(label);
        } else {
            self.text.push_str("...");
            self.truncated = true;
        }
    }
}

/// Ordered phases plus the sweep cap.
#[derive(Debug, Clone)]
pub struct ShutdownPlan {
    phases: Vec<Phase>,
    max_sweeps: usize,
}

impl Default for ShutdownPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownPlan {
    /// Empty plan with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            max_sweeps: MAX_SHUTDOWN_SWEEPS,
        }
    }

    /// Append a phase.
    #[must_use]
    pub fn phase(mut self, name: &'static str, steps: Vec<TermStep>) -> Self {
        self.phases.push(Phase { name, steps });
        self
    }

    /// Override the sweep cap (at least one sweep always runs).
    #[must_use]
    pub fn with_max_sweeps(mut self, max: usize) -> Self {
        self.max_sweeps = max.max(1);
        self
    }

    #[must_use]
    pub fn max_sweeps(&self) -> usize {
        self.max_sweeps
    }

    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Step labels per phase.
    #[must_use]
    pub fn labels(&self) -> Vec<Vec<&'static str>> {
        self.phases
            .iter()
            .map(|p| p.steps.iter().map(TermStep::label).collect())
            .collect()
    }

    /// The engine's dependency order over `table`: dependents before what
    /// they depend on.
    #[must_use]
    pub fn standard(table: &SubsystemTable) -> Self {
        use SubsystemId::*;
        const MANAGERS: [SubsystemId; 6] = [A, D, G, M, S, T];

        let pkg = |id| TermStep::package(table, id);
        Self::new()
            .phase("event_sets", vec![pkg(Es)])
            .phase("links", vec![pkg(L)])
            .phase(
                "managers_top",
                MANAGERS.iter().map(|&id| TermStep::top(table, id)).collect(),
            )
            .phase("files", vec![pkg(F)])
            .phase("property_lists", vec![pkg(P)])
            .phase("managers", MANAGERS.iter().map(|&id| pkg(id)).collect())
            .phase("pluggable", vec![pkg(Ac), pkg(Z), pkg(Fd), pkg(Vl)])
            .phase("plugins", vec![pkg(Pl)])
            .phase("errors", vec![pkg(E)])
            .phase("ids", vec![pkg(I)])
            .phase("skip_lists", vec![pkg(Sl)])
            .phase("free_lists", vec![pkg(Fl)])
            .phase("api_context", vec![pkg(Cx)])
    }

    /// Run sweeps to convergence or the cap.
    pub fn run(&self, observer: &mut dyn SweepObserver) -> ShutdownReport {
        let mut summary = Summary::default();
        let mut stuck = Vec::new();
        let mut sweeps = 0;
        let mut pending;

        loop {
            sweeps += 1;
            pending = 0;
            stuck.clear();

            for (index, phase) in self.phases.iter().enumerate() {
                if index > 0 && pending > 0 {
                    break;
                }
                for step in &phase.steps {
                    let n = step.call();
                    observer.step_done(sweeps, step, n);
                    if n > 0 {
                        pending += n;
                        stuck.push(step.label);
                        summary.push(step.label);
                    }
                }
            }
            observer.sweep_done(sweeps, pending);

            if pending == 0 || sweeps >= self.max_sweeps {
                break;
            }
        }

        ShutdownReport {
            sweeps,
            converged: pending == 0,
            pending,
            stuck,
            summary: summary.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn countdown(n: usize) -> (Arc<AtomicUsize>, impl Fn() -> usize + Send + Sync + 'static) {
        let left = Arc::new(AtomicUsize::new(n));
        let hook_left = Arc::clone(&left);
        let hook = move || {
            let cur = hook_left.load(Ordering::SeqCst);
            if cur > 0 {
                hook_left.store(cur - 1, Ordering::SeqCst);
                1
            } else {
                0
            }
        };
        (left, hook)
    }

    #[test]
    fn standard_plan_orders_dependents_first() {
        let plan = ShutdownPlan::standard(&SubsystemTable::inert());
        let labels = plan.labels();
        assert_eq!(labels.len(), 13);
        assert_eq!(labels[0], ["ES"]);
        assert_eq!(labels[1], ["L"]);
        assert_eq!(labels[2], ["A_top", "D_top", "G_top", "M_top", "S_top", "T_top"]);
        assert_eq!(labels[3], ["F"]);
        assert_eq!(labels[4], ["P"]);
        assert_eq!(labels[5], ["A", "D", "G", "M", "S", "T"]);
        assert_eq!(labels[6], ["AC", "Z", "FD", "VL"]);
        let tail: Vec<_> = labels[7..].iter().map(|p| p[0]).collect();
        assert_eq!(tail, ["PL", "E", "I", "SL", "FL", "CX"]);
    }

    #[test]
    fn quiescent_plan_converges_in_one_sweep() {
        let plan = ShutdownPlan::standard(&SubsystemTable::inert());
        let report = plan.run(&mut ());
        assert!(report.converged);
        assert_eq!(report.sweeps, 1);
        assert!(report.summary.is_empty());
    }

    #[test]
    fn later_phases_wait_for_earlier_ones() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (_, first) = countdown(2);
        let log_a = Arc::clone(&calls);
        let log_b = Arc::clone(&calls);
        let plan = ShutdownPlan::new()
            .phase(
                "one",
                vec![TermStep::new("one", move || {
                    log_a.lock().unwrap().push("one");
                    first()
                })],
            )
            .phase(
                "two",
                vec![TermStep::new("two", move || {
                    log_b.lock().unwrap().push("two");
                    0
                })],
            );
        let report = plan.run(&mut ());
        assert!(report.converged);
        assert_eq!(report.sweeps, 3);
        assert_eq!(*calls.lock().unwrap(), ["one", "one", "one", "two"]);
        assert_eq!(report.summary, "one,one");
    }

    #[test]
    fn all_steps_of_a_phase_run_even_when_one_is_pending() {
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let (_, busy) = countdown(1);
        let plan = ShutdownPlan::new().phase(
            "group",
            vec![
                TermStep::new("busy", busy),
                TermStep::new("quiet", move || {
                    s.fetch_add(1, Ordering::SeqCst);
                    0
                }),
            ],
        );
        let report = plan.run(&mut ());
        assert_eq!(report.sweeps, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cap_stops_endless_work() {
        let plan = ShutdownPlan::new().phase("stuck", vec![TermStep::new("L", || 1)]);
        let report = plan.run(&mut ());
        assert!(!report.converged);
        assert_eq!(report.sweeps, MAX_SHUTDOWN_SWEEPS);
        assert_eq!(report.stuck, ["L"]);
        let err = report.diverged_error();
        assert!(err.to_string().contains("after 100 sweeps: L"));
    }

    #[test]
    fn summary_truncates_with_ellipsis() {
        let plan = ShutdownPlan::new()
            .phase("stuck", vec![TermStep::new("LONGNAME", || 1)])
            .with_max_sweeps(500);
        let report = plan.run(&mut ());
        assert!(report.summary.len() < SUMMARY_CAPACITY);
        assert!(report.summary.ends_with("..."));
        assert!(report.summary.starts_with("LONGNAME,LONGNAME"));
    }

    #[test]
    fn observer_sees_every_step() {
        #[derive(Default)]
        struct Tally {
            steps: usize,
            sweeps: Vec<(usize, usize)>,
        }
        impl SweepObserver for Tally {
            fn step_done(&mut self, _: usize, _: &TermStep, _: usize) {
                self.steps += 1;
            }
            fn sweep_done(&mut self, sweep: usize, pending: usize) {
                self.sweeps.push((sweep, pending));
            }
        }
        let (_, hook) = countdown(1);
        let plan = ShutdownPlan::new()
            .phase("a", vec![TermStep::new("a", hook)])
            .phase("b", vec![TermStep::new("b", || 0)]);
        let mut tally = Tally::default();
        plan.run(&mut tally);
        assert_eq!(tally.steps, 3);
        assert_eq!(tally.sweeps, [(1, 1), (2, 0)]);
    }
}

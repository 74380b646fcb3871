//! Scheduling of active trackers.
//!
//! The registry keeps one ordered list of trackers per [`UpdatePhase`]. The
//! host loop calls [`TrackingRegistry::tick_fixed`] once per physics step and
//! [`TrackingRegistry::tick_variable`] once per frame; each steps every
//! tracker in that phase, in registration order.
//!
//! ```text
//!  host loop
//!     │
//!     ├── tick_fixed(dt) ──► [tracker A] → [tracker C] → ...
//!     │
//!     └── tick_variable(dt) ─► [tracker B] → ...
//! ```
//!
//! A registry is a cheap, clonable handle. Trackers keep a clone and register
//! or deregister themselves as their first binding is added and their last
//! removed. Entries are weak: the registry never keeps a tracker alive.
//!
//! Each owner body has at most one entry across both lists. Registering a
//! tracker for an owner that already has one replaces the old entry in place
//! (or moves it, if the phase differs).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::body::BodySet;
use crate::tracker::Tracker;
use crate::types::{BodyId, UpdatePhase};

#[derive(Debug, Clone)]
struct Entry {
    owner: BodyId,
    tracker: Weak<Tracker>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.tracker.strong_count() > 0
    }
}

#[derive(Debug, Default)]
struct PhaseLists {
    per_frame: Vec<Entry>,
    per_fixed_step: Vec<Entry>,
}

impl PhaseLists {
    fn list(&self, phase: UpdatePhase) -> &Vec<Entry> {
        match phase {
            UpdatePhase::PerFrame => &self.per_frame,
            UpdatePhase::PerFixedStep => &self.per_fixed_step,
        }
    }

    fn list_mut(&mut self, phase: UpdatePhase) -> &mut Vec<Entry> {
        match phase {
            UpdatePhase::PerFrame => &mut self.per_frame,
            UpdatePhase::PerFixedStep => &mut self.per_fixed_step,
        }
    }

    fn remove(&mut self, tracker: &Weak<Tracker>) -> Option<UpdatePhase> {
        UpdatePhase::ALL.into_iter().find(|&phase| {
            let list = self.list_mut(phase);
            match list.iter().position(|e| Weak::ptr_eq(&e.tracker, tracker)) {
                Some(index) => {
                    list.remove(index);
                    true
                }
                None => false,
            }
        })
    }
}

/// Outcome of one [`TrackingRegistry::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Trackers stepped successfully.
    pub stepped: usize,
    /// Trackers whose step returned an error.
    pub failed: usize,
    /// Entries dropped because their tracker no longer exists.
    pub pruned: usize,
}

/// Per-phase lists of active trackers.
#[derive(Debug, Clone, Default)]
pub struct TrackingRegistry {
    lists: Rc<RefCell<PhaseLists>>,
}

impl TrackingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tracker` under `phase`.
    ///
    /// An existing entry for the same owner is replaced in place if it is in
    /// `phase`, or removed from the other list. Otherwise the tracker is
    /// appended.
    ///
    /// Trackers call this themselves when their first target is bound.
    pub fn add_tracker(&self, tracker: &Rc<Tracker>, phase: UpdatePhase) {
        self.insert(tracker.owner(), Rc::downgrade(tracker), phase);
    }

    /// Remove `tracker` from whichever list holds it. Returns the phase it
    /// was removed from, or `None` if it was not registered.
    pub fn remove_tracker(&self, tracker: &Rc<Tracker>) -> Option<UpdatePhase> {
        self.remove_entry(&Rc::downgrade(tracker))
    }

    /// Whether `tracker` is registered in either phase.
    #[must_use]
    pub fn contains(&self, tracker: &Rc<Tracker>) -> bool {
        self.phase_of(tracker).is_some()
    }

    /// The phase `tracker` is registered under.
    #[must_use]
    pub fn phase_of(&self, tracker: &Rc<Tracker>) -> Option<UpdatePhase> {
        let weak = Rc::downgrade(tracker);
        let lists = self.lists.borrow();
        UpdatePhase::ALL.into_iter().find(|&phase| {
            lists
                .list(phase)
                .iter()
                .any(|e| Weak::ptr_eq(&e.tracker, &weak))
        })
    }

    /// Locate the entry for `owner`, checking the per-frame list first.
    #[must_use]
    pub fn find_tracker(&self, owner: BodyId) -> Option<(UpdatePhase, usize)> {
        let lists = self.lists.borrow();
        [UpdatePhase::PerFrame, UpdatePhase::PerFixedStep]
            .into_iter()
            .find_map(|phase| {
                lists
                    .list(phase)
                    .iter()
                    .position(|e| e.owner == owner)
                    .map(|index| (phase, index))
            })
    }

    /// Tracker at `index` in `phase`'s list.
    #[must_use]
    pub fn tracker_at(&self, phase: UpdatePhase, index: usize) -> Option<Rc<Tracker>> {
        self.lists
            .borrow()
            .list(phase)
            .get(index)
            .and_then(|e| e.tracker.upgrade())
    }

    /// Live trackers in `phase`, in step order.
    #[must_use]
    pub fn trackers(&self, phase: UpdatePhase) -> Vec<Rc<Tracker>> {
        self.lists
            .borrow()
            .list(phase)
            .iter()
            .filter_map(|e| e.tracker.upgrade())
            .collect()
    }

    /// Number of entries in `phase`.
    #[must_use]
    pub fn len(&self, phase: UpdatePhase) -> usize {
        self.lists.borrow().list(phase).len()
    }

    /// Whether both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let lists = self.lists.borrow();
        lists.per_frame.is_empty() && lists.per_fixed_step.is_empty()
    }

    /// Step every tracker in `phase` once, in registration order.
    ///
    /// The list is snapshotted first, so trackers may be added or removed
    /// while the tick runs. A tracker whose step fails is logged and
    /// counted; the remaining trackers still run. A `dt` that is not positive
    /// and finite skips the whole tick.
    pub fn tick<B: BodySet + ?Sized>(
        &self,
        phase: UpdatePhase,
        dt: f64,
        bodies: &mut B,
    ) -> TickReport {
        let mut report = TickReport::default();
        if !(dt.is_finite() && dt > 0.0) {
            debug!(%phase, dt, "skipping tick with invalid timestep");
            return report;
        }

        let snapshot: Vec<Weak<Tracker>> = {
            let mut lists = self.lists.borrow_mut();
            let list = lists.list_mut(phase);
            let before = list.len();
            list.retain(Entry::is_live);
            report.pruned = before - list.len();
            list.iter().map(|e| e.tracker.clone()).collect()
        };

        for weak in snapshot {
            // Dropped earlier in this tick.
            let Some(tracker) = weak.upgrade() else {
                continue;
            };
            match tracker.step(dt, bodies) {
                Ok(()) => report.stepped += 1,
                Err(err) => {
                    warn!(owner = %tracker.owner(), %phase, error = %err, "tracker step failed");
                    report.failed += 1;
                }
            }
        }

        trace!(%phase, dt, ?report, "tick complete");
        report
    }

    /// Tick the variable-rate (per-frame) phase.
    pub fn tick_variable<B: BodySet + ?Sized>(&self, dt: f64, bodies: &mut B) -> TickReport {
        self.tick(UpdatePhase::PerFrame, dt, bodies)
    }

    /// Tick the fixed-rate (per-physics-step) phase.
    pub fn tick_fixed<B: BodySet + ?Sized>(&self, dt: f64, bodies: &mut B) -> TickReport {
        self.tick(UpdatePhase::PerFixedStep, dt, bodies)
    }

    pub(crate) fn insert(&self, owner: BodyId, tracker: Weak<Tracker>, phase: UpdatePhase) {
        let mut lists = self.lists.borrow_mut();

        let other = lists.list_mut(phase.other());
        if let Some(index) = other.iter().position(|e| e.owner == owner) {
            other.remove(index);
            debug!(%owner, from = %phase.other(), to = %phase, "moved tracker between phases");
        }

        let entry = Entry { owner, tracker };
        let list = lists.list_mut(phase);
        if let Some(existing) = list.iter_mut().find(|e| e.owner == owner) {
            *existing = entry;
            debug!(%owner, %phase, "replaced tracker");
        } else {
            list.push(entry);
            debug!(%owner, %phase, "registered tracker");
        }
    }

    pub(crate) fn remove_entry(&self, tracker: &Weak<Tracker>) -> Option<UpdatePhase> {
        let removed = self.lists.borrow_mut().remove(tracker);
        if let Some(phase) = removed {
            debug!(%phase, "deregistered tracker");
        }
        removed
    }

    pub(crate) fn contains_entry(&self, tracker: &Weak<Tracker>) -> bool {
        let lists = self.lists.borrow();
        UpdatePhase::ALL.into_iter().any(|phase| {
            lists
                .list(phase)
                .iter()
                .any(|e| Weak::ptr_eq(&e.tracker, tracker))
        })
    }

    /// Deregister from a destructor. Leaves a stale entry for the next tick
    /// to prune if the lists are borrowed.
    pub(crate) fn detach(&self, tracker: &Weak<Tracker>) {
        match self.lists.try_borrow_mut() {
            Ok(mut lists) => {
                if let Some(phase) = lists.remove(tracker) {
                    debug!(%phase, "deregistered dropped tracker");
                }
            }
            Err(_) => warn!("registry busy; dropped tracker will be pruned on next tick"),
        }
    }
}

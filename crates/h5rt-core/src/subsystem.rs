//! Subsystem contract and the table of collaborators driven by the lifecycle.
//!
//! Each storage-engine subsystem is consumed only through two hooks: an
//! initializer and a `term_package` step that reports how much work it did.
//! Subsystems with a two-stage teardown additionally expose `term_top`.

use std::fmt;
use std::sync::Arc;

use crate::error::SubsystemError;

/// Identifiers of every subsystem the lifecycle knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubsystemId {
    /// Asynchronous event sets.
    Es,
    /// Links.
    L,
    /// Attributes.
    A,
    /// Datasets.
    D,
    /// Groups.
    G,
    /// Maps.
    M,
    /// Dataspaces.
    S,
    /// Datatypes.
    T,
    /// Files.
    F,
    /// Property lists.
    P,
    /// Metadata cache.
    Ac,
    /// Filters.
    Z,
    /// Virtual file drivers.
    Fd,
    /// Virtual object layer.
    Vl,
    /// Plugin loader.
    Pl,
    /// Error handling.
    E,
    /// Identifier registry.
    I,
    /// Skip lists.
    Sl,
    /// Free lists.
    Fl,
    /// API context stack.
    Cx,
    /// Object headers.
    O,
    /// File-space manager.
    Fs,
}

impl SubsystemId {
    pub const ALL: [Self; 22] = [
        Self::Es,
        Self::L,
        Self::A,
        Self::D,
        Self::G,
        Self::M,
        Self::S,
        Self::T,
        Self::F,
        Self::P,
        Self::Ac,
        Self::Z,
        Self::Fd,
        Self::Vl,
        Self::Pl,
        Self::E,
        Self::I,
        Self::Sl,
        Self::Fl,
        Self::Cx,
        Self::O,
        Self::Fs,
    ];

    /// Short upper-case name used in logs and shutdown diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Es => "ES",
            Self::L => "L",
            Self::A => "A",
            Self::D => "D",
            Self::G => "G",
            Self::M => "M",
            Self::S => "S",
            Self::T => "T",
            Self::F => "F",
            Self::P => "P",
            Self::Ac => "AC",
            Self::Z => "Z",
            Self::Fd => "FD",
            Self::Vl => "VL",
            Self::Pl => "PL",
            Self::E => "E",
            Self::I => "I",
            Self::Sl => "SL",
            Self::Fl => "FL",
            Self::Cx => "CX",
            Self::O => "O",
            Self::Fs => "FS",
        }
    }

    /// Debug package whose stream receives this subsystem's term results.
    #[must_use]
    pub const fn debug_package(self) -> Option<&'static str> {
        match self {
            Self::A => Some("a"),
            Self::Ac => Some("ac"),
            Self::D => Some("d"),
            Self::E => Some("e"),
            Self::F => Some("f"),
            Self::G => Some("g"),
            Self::I => Some("i"),
            Self::M => Some("m"),
            Self::Fs => Some("mf"),
            Self::Fl => Some("mm"),
            Self::O => Some("o"),
            Self::P => Some("p"),
            Self::S => Some("s"),
            Self::T => Some("t"),
            Self::Fd => Some("v"),
            Self::Vl => Some("vl"),
            Self::Z => Some("z"),
            Self::Es | Self::L | Self::Pl | Self::Sl | Self::Cx => None,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contract every subsystem exposes to the lifecycle.
pub trait Subsystem: Send + Sync {
    /// Full (or first-phase) initialization.
    fn init(&self) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Second-phase initialization, for subsystems initialized in two steps.
    fn init_phase2(&self) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Identifier-level teardown that keeps internal structures usable.
    fn term_top(&self) -> usize {
        0
    }

    /// Teardown step. Zero means quiescent; a positive value means work was
    /// done and another sweep may be needed.
    fn term_package(&self) -> usize;
}

/// A subsystem with nothing to set up or tear down.
#[derive(Debug, Default, Clone, Copy)]
pub struct InertSubsystem;

impl Subsystem for InertSubsystem {
    fn term_package(&self) -> usize {
        0
    }
}

/// Which initializer an [`InitStep`] calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Full,
    Phase1,
    Phase2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitStep {
    pub id: SubsystemId,
    pub stage: InitStage,
}

const fn step(id: SubsystemId, stage: InitStage) -> InitStep {
    InitStep { id, stage }
}

/// Dependency order of subsystem initialization. Error handling comes first;
/// the file-driver, object-layer and property-list first phases supply
/// defaults the remaining steps rely on.
pub const INIT_ORDER: [InitStep; 11] = [
    step(SubsystemId::E, InitStage::Full),
    step(SubsystemId::Fd, InitStage::Full),
    step(SubsystemId::Vl, InitStage::Phase1),
    step(SubsystemId::P, InitStage::Phase1),
    step(SubsystemId::L, InitStage::Full),
    step(SubsystemId::O, InitStage::Full),
    step(SubsystemId::Fs, InitStage::Full),
    step(SubsystemId::S, InitStage::Full),
    step(SubsystemId::T, InitStage::Full),
    step(SubsystemId::P, InitStage::Phase2),
    step(SubsystemId::Vl, InitStage::Phase2),
];

/// Subsystem implementations keyed by [`SubsystemId`].
#[derive(Clone)]
pub struct SubsystemTable {
    entries: Vec<Arc<dyn Subsystem>>,
}

impl fmt::Debug for SubsystemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Default for SubsystemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemTable {
    /// Table with the in-crate subsystems (error stack, free lists, API
    /// context) wired in and every external collaborator inert.
    #[must_use]
    pub fn new() -> Self {
        Self::inert()
            .with(SubsystemId::E, Arc::new(crate::error_stack::ErrorStackPackage))
            .with(SubsystemId::Fl, Arc::new(crate::freelist::FreeListPackage))
            .with(SubsystemId::Cx, Arc::new(crate::api_context::ApiContextPackage))
    }

    /// Every entry inert.
    #[must_use]
    pub fn inert() -> Self {
        let inert: Arc<dyn Subsystem> = Arc::new(InertSubsystem);
        Self {
            entries: vec![inert; SubsystemId::ALL.len()],
        }
    }

    /// Replace one entry.
    #[must_use]
    pub fn with(mut self, id: SubsystemId, subsystem: Arc<dyn Subsystem>) -> Self {
        self.entries[id.index()] = subsystem;
        self
    }

    #[must_use]
    pub fn get(&self, id: SubsystemId) -> &Arc<dyn Subsystem> {
        &self.entries[id.index()]
    }

    /// Run one initialization step.
    pub fn run_init(&self, step: InitStep) -> Result<(), SubsystemError> {
        let subsystem = self.get(step.id);
        match step.stage {
            InitStage::Full | InitStage::Phase1 => subsystem.init(),
            InitStage::Phase2 => subsystem.init_phase2(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        phase2: AtomicUsize,
    }

    impl Subsystem for Counting {
        fn init(&self) -> Result<(), SubsystemError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn init_phase2(&self) -> Result<(), SubsystemError> {
            self.phase2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn term_package(&self) -> usize {
            0
        }
    }

    #[test]
    fn ids_index_their_table_slot() {
        for (i, id) in SubsystemId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn debug_packages_exist_in_package_table() {
        for id in SubsystemId::ALL {
            if let Some(pkg) = id.debug_package() {
                assert!(crate::debug::package_index(pkg).is_some(), "{id}");
            }
        }
    }

    #[test]
    fn init_order_starts_with_error_handling_and_splits_phases() {
        assert_eq!(INIT_ORDER[0].id, SubsystemId::E);
        let p1 = INIT_ORDER
            .iter()
            .position(|s| s.id == SubsystemId::P && s.stage == InitStage::Phase1)
            .unwrap();
        let p2 = INIT_ORDER
            .iter()
            .position(|s| s.id == SubsystemId::P && s.stage == InitStage::Phase2)
            .unwrap();
        let t = INIT_ORDER.iter().position(|s| s.id == SubsystemId::T).unwrap();
        assert!(p1 < t && t < p2);
        assert_eq!(INIT_ORDER.last().unwrap().id, SubsystemId::Vl);
    }

    #[test]
    fn run_init_dispatches_by_stage() {
        let vl = Arc::new(Counting::default());
        let table = SubsystemTable::inert().with(SubsystemId::Vl, vl.clone());
        for step in INIT_ORDER {
            table.run_init(step).unwrap();
        }
        assert_eq!(vl.inits.load(Ordering::SeqCst), 1);
        assert_eq!(vl.phase2.load(Ordering::SeqCst), 1);
    }
}

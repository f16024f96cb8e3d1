//! Library lifecycle state machine.
//!
//! `Uninitialized -> Initializing -> Initialized -> Terminating ->
//! Uninitialized`, repeatable for the life of the process. Transitions run
//! under one re-entrant process-wide lock, so other threads only ever
//! observe the stable states; a thread that re-enters from inside a
//! transition (a subsystem init calling back into `open`, an atclose
//! callback calling `terminate`) gets a no-op.

use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::{Mutex, ReentrantMutex};

use crate::api_context::{self, ApiContextGuard};
use crate::atclose::{AtcloseCallback, AtcloseRegistry, CallbackOutcome};
use crate::config::{self, VersionCheckLevel};
use crate::debug::DebugConfig;
use crate::error::{LibError, Result};
use crate::error_stack;
use crate::exit_hook::{ExitHook, ProcessExitHook};
use crate::freelist::FreeListSizes;
use crate::log::{Diagnostics, LifecycleLog, LifecycleLogRecord, LogLevel};
use crate::memory;
use crate::sandbox::{self, SandboxError};
use crate::shutdown::{MAX_SHUTDOWN_SWEEPS, ShutdownPlan, ShutdownReport, SweepObserver, TermStep};
use crate::subsystem::{INIT_ORDER, SubsystemTable};
use crate::version::{FatalPolicy, Version, VersionGuard, VersionVerdict};

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Initialized,
    Terminating,
}

impl LifecycleState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initializing => 1,
            Self::Initialized => 2,
            Self::Terminating => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Terminating,
            _ => Self::Uninitialized,
        }
    }
}

/// Flag view of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LibraryState {
    pub initialized: bool,
    pub terminating: bool,
    pub suppress_auto_shutdown: bool,
}

/// Where the debug mask comes from on each open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugFlagsSource {
    /// `H5RT_DEBUG`.
    Env,
    Fixed(Option<String>),
}

/// Injectable policies and collaborators.
#[derive(Clone)]
pub struct LibraryConfig {
    pub subsystems: SubsystemTable,
    /// Response to an incompatible version at the aborting level.
    pub version_policy: FatalPolicy,
    /// Response to shutdown non-convergence.
    pub shutdown_policy: FatalPolicy,
    /// `None` reads `H5RT_DISABLE_VERSION_CHECK`.
    pub version_level: Option<VersionCheckLevel>,
    pub debug_flags: DebugFlagsSource,
    pub exit_hook: Arc<dyn ExitHook>,
    /// Function handed to `exit_hook`.
    pub finalizer: extern "C" fn(),
    pub diagnostics: Diagnostics,
    pub max_sweeps: usize,
}

impl fmt::Debug for LibraryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryConfig")
            .field("version_policy", &self.version_policy)
            .field("shutdown_policy", &self.shutdown_policy)
            .field("version_level", &self.version_level)
            .field("debug_flags", &self.debug_flags)
            .field("exit_hook", &self.exit_hook)
            .field("max_sweeps", &self.max_sweeps)
            .finish_non_exhaustive()
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self::process()
    }
}

impl LibraryConfig {
    /// Configuration of the process-wide library: abort on fatal version
    /// mismatches, abort on non-convergence in debug builds only, install
    /// `atexit`, read both environment variables.
    #[must_use]
    pub fn process() -> Self {
        Self {
            subsystems: SubsystemTable::new(),
            version_policy: FatalPolicy::Abort,
            shutdown_policy: if cfg!(debug_assertions) {
                FatalPolicy::Abort
            } else {
                FatalPolicy::Report
            },
            version_level: None,
            debug_flags: DebugFlagsSource::Env,
            exit_hook: Arc::new(ProcessExitHook),
            finalizer: terminate_at_exit,
            diagnostics: Diagnostics::Stderr,
            max_sweeps: MAX_SHUTDOWN_SWEEPS,
        }
    }

    #[must_use]
    pub fn with_subsystems(mut self, table: SubsystemTable) -> Self {
        self.subsystems = table;
        self
    }

    #[must_use]
    pub fn with_version_policy(mut self, policy: FatalPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    #[must_use]
    pub fn with_shutdown_policy(mut self, policy: FatalPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    #[must_use]
    pub fn with_version_level(mut self, level: VersionCheckLevel) -> Self {
        self.version_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_debug_flags(mut self, flags: Option<&str>) -> Self {
        self.debug_flags = DebugFlagsSource::Fixed(flags.map(str::to_owned));
        self
    }

    #[must_use]
    pub fn with_exit_hook(mut self, hook: Arc<dyn ExitHook>) -> Self {
        self.exit_hook = hook;
        self
    }

    #[must_use]
    pub fn with_finalizer(mut self, finalizer: extern "C" fn()) -> Self {
        self.finalizer = finalizer;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn with_max_sweeps(mut self, max: usize) -> Self {
        self.max_sweeps = max;
        self
    }
}

/// The library: lifecycle flags, registries and collaborators.
pub struct Library {
    api_lock: ReentrantMutex<()>,
    state: AtomicU8,
    suppress_auto_shutdown: AtomicBool,
    atclose: Mutex<AtcloseRegistry>,
    debug: Mutex<DebugConfig>,
    log: Mutex<LifecycleLog>,
    plan: ShutdownPlan,
    version_guard: VersionGuard,
    config: LibraryConfig,
    epoch: Instant,
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("state", &self.lifecycle_state())
            .field("suppress_auto_shutdown", &self.suppress_auto_shutdown)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Library {
    #[must_use]
    pub fn new(config: LibraryConfig) -> Self {
        let plan = ShutdownPlan::standard(&config.subsystems).with_max_sweeps(config.max_sweeps);
        Self::with_plan(config, plan)
    }

    /// Use a custom shutdown plan instead of the standard ordering.
    #[must_use]
    pub fn with_plan(config: LibraryConfig, plan: ShutdownPlan) -> Self {
        Self {
            api_lock: ReentrantMutex::new(()),
            state: AtomicU8::new(LifecycleState::Uninitialized.to_u8()),
            suppress_auto_shutdown: AtomicBool::new(false),
            atclose: Mutex::new(AtcloseRegistry::new()),
            debug: Mutex::new(DebugConfig::new()),
            log: Mutex::new(LifecycleLog::new()),
            plan,
            version_guard: VersionGuard::new(),
            config,
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    #[must_use]
    pub fn state(&self) -> LibraryState {
        let state = self.lifecycle_state();
        LibraryState {
            initialized: state != LifecycleState::Uninitialized,
            terminating: state == LifecycleState::Terminating,
            suppress_auto_shutdown: self.suppress_auto_shutdown.load(Ordering::Acquire),
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Initialized
    }

    /// True while termination is running; lets plugin code tell a
    /// library-shutdown callback from an ordinary one.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Terminating
    }

    /// Whether the build supports concurrent use.
    #[must_use]
    pub const fn is_threadsafe(&self) -> bool {
        cfg!(feature = "threadsafe")
    }

    fn record(
        &self,
        level: LogLevel,
        event: &'static str,
        subsystem: Option<&'static str>,
        outcome: &'static str,
        details: impl Into<String>,
    ) -> u64 {
        self.log.lock().record(level, event, subsystem, outcome, details)
    }

    /// Push an API context and emit a trace line if tracing is on.
    pub fn enter_api(&self, name: &'static str) -> ApiContextGuard {
        let guard = api_context::enter(name);
        let trace = {
            let debug = self.debug.lock();
            debug
                .trace()
                .filter(|_| !debug.ttop() || guard.is_top_level())
                .cloned()
                .map(|stream| (stream, debug.ttimes()))
        };
        if let Some((stream, ttimes)) = trace {
            if ttimes {
                let elapsed = self.epoch.elapsed().as_secs_f64();
                stream.emit(format_args!("@{elapsed:.6} {name}()\n"));
            } else {
                stream.emit(format_args!("{name}()\n"));
            }
        }
        guard
    }

    /// Initialize the library if it is not already. Idempotent.
    pub fn open(&self) -> Result<()> {
        let _lock = self.api_lock.lock();
        let _cx = self.enter_api("h5rt_open");
        self.ensure_open()
    }

    /// `open` for entry points that initialize implicitly; not traced.
    fn ensure_open(&self) -> Result<()> {
        let _lock = self.api_lock.lock();
        match self.lifecycle_state() {
            LifecycleState::Uninitialized => self.init_library(),
            _ => Ok(()),
        }
    }

    fn init_library(&self) -> Result<()> {
        self.check_library_version()?;

        // Mark as initialized before any subsystem runs so that re-entrant
        // calls from their init code do not recurse.
        self.set_state(LifecycleState::Initializing);
        *self.debug.lock() = DebugConfig::new();

        if !self.suppress_auto_shutdown.load(Ordering::Acquire) {
            let installed = self.config.exit_hook.install(self.config.finalizer);
            self.suppress_auto_shutdown.store(true, Ordering::Release);
            self.record(
                if installed { LogLevel::Debug } else { LogLevel::Warn },
                "exit_hook",
                None,
                if installed { "installed" } else { "refused" },
                "",
            );
        }

        for step in INIT_ORDER {
            if let Err(source) = self.config.subsystems.run_init(step) {
                let err = LibError::SubsystemInit {
                    subsystem: step.id.name(),
                    source,
                };
                self.record(
                    LogLevel::Error,
                    "init_subsystem",
                    Some(step.id.name()),
                    "failed",
                    err.to_string(),
                );
                self.set_state(LifecycleState::Uninitialized);
                return Err(err);
            }
            self.record(
                LogLevel::Trace,
                "init_subsystem",
                Some(step.id.name()),
                "ok",
                format!("stage={:?}", step.stage),
            );
        }

        let flags = match &self.config.debug_flags {
            DebugFlagsSource::Env => config::debug_flags_from_env(),
            DebugFlagsSource::Fixed(flags) => flags.clone(),
        };
        self.config.diagnostics.with_writer(|diag| {
            let mut debug = self.debug.lock();
            debug.apply("-all", diag);
            if let Some(flags) = flags.as_deref() {
                let report = debug.apply(flags, diag);
                drop(debug);
                self.record(
                    LogLevel::Debug,
                    "debug_mask",
                    None,
                    "applied",
                    format!(
                        "ignored={};opened={};failed={}",
                        report.ignored.len(),
                        report.opened.len(),
                        report.failed_descriptors.len()
                    ),
                );
            }
        });

        self.set_state(LifecycleState::Initialized);
        self.record(LogLevel::Info, "open", None, "initialized", "");
        Ok(())
    }

    fn version_level(&self) -> VersionCheckLevel {
        self.config
            .version_level
            .unwrap_or_else(config::version_check_level)
    }

    fn check_library_version(&self) -> Result<VersionVerdict> {
        self.check_version(Version::LIBRARY)
    }

    /// Compare caller headers with the running library. Runs at most once;
    /// may abort the process under the default policy.
    pub fn check_version(&self, headers: Version) -> Result<VersionVerdict> {
        let _lock = self.api_lock.lock();
        let level = self.version_level();
        let result = self.config.diagnostics.with_writer(|diag| {
            self.version_guard
                .check(headers, level, self.config.version_policy, diag)
        });
        match &result {
            Ok(verdict) if !verdict.cached => {
                self.record(
                    if verdict.warned { LogLevel::Warn } else { LogLevel::Debug },
                    "version_check",
                    None,
                    if verdict.major_minor_mismatch || verdict.release_exception {
                        "mismatch_tolerated"
                    } else {
                        "compatible"
                    },
                    format!("headers={headers};level={}", level.as_numeric()),
                );
            }
            Ok(_) => {}
            Err(err) => {
                self.record(
                    LogLevel::Error,
                    "version_check",
                    None,
                    "incompatible",
                    err.to_string(),
                );
            }
        }
        result
    }

    /// The running library's version.
    #[must_use]
    pub fn lib_version(&self) -> Version {
        Version::LIBRARY
    }

    /// Opt out of the automatic process-exit termination. Only the first
    /// call succeeds; after the exit hook is installed every call fails.
    pub fn dont_atexit(&self) -> Result<()> {
        let _lock = self.api_lock.lock();
        let _cx = self.enter_api("h5rt_dont_atexit");
        if self.suppress_auto_shutdown.swap(true, Ordering::AcqRel) {
            return Err(LibError::Usage("dont_atexit called more than once or too late"));
        }
        self.record(LogLevel::Info, "dont_atexit", None, "suppressed", "");
        Ok(())
    }

    /// Register a callback to run when the library closes. Initializes the
    /// library first.
    pub fn atclose(&self, callback: Option<AtcloseCallback>) -> Result<()> {
        let _lock = self.api_lock.lock();
        self.ensure_open()?;
        let _cx = self.enter_api("h5rt_atclose");
        let seq = self.atclose.lock().register(callback)?;
        self.record(LogLevel::Debug, "atclose", None, "registered", format!("seq={seq}"));
        Ok(())
    }

    #[must_use]
    pub fn pending_atclose(&self) -> usize {
        self.atclose.lock().len()
    }

    fn run_user_callback(callback: AtcloseCallback) -> Result<CallbackOutcome, SandboxError> {
        let saved = sandbox::prepare();
        let ran = panic::catch_unwind(AssertUnwindSafe(callback));
        saved.and_then(sandbox::restore)?;
        Ok(match ran {
            Ok(()) => CallbackOutcome::Completed,
            Err(_) => CallbackOutcome::Panicked,
        })
    }

    /// Terminate the library. A no-op (returning `None`) unless the library
    /// is initialized.
    ///
    /// Runs atclose callbacks newest-first, drives the shutdown plan, closes
    /// debug streams and resets the lifecycle. Non-convergence is reported
    /// per the shutdown policy; a failure to save or restore thread state
    /// around a callback is returned as [`LibError::Sandbox`] once the
    /// remaining callbacks and the sweep have run. The lifecycle is reset
    /// either way.
    pub fn terminate(&self) -> Result<Option<ShutdownReport>> {
        let _lock = self.api_lock.lock();
        if self.lifecycle_state() != LifecycleState::Initialized {
            return Ok(None);
        }
        self.set_state(LifecycleState::Terminating);
        let _cx = self.enter_api("h5rt_close");

        let entries = self.atclose.lock().take_lifo();
        let mut sandbox_failure = None;
        for entry in entries {
            let seq = entry.seq();
            let outcome = match Self::run_user_callback(entry.into_callback()) {
                Ok(outcome) => outcome,
                Err(err) => {
                    sandbox_failure.get_or_insert(err);
                    CallbackOutcome::SandboxFailed
                }
            };
            self.record(
                match outcome {
                    CallbackOutcome::Completed => LogLevel::Debug,
                    _ => LogLevel::Error,
                },
                "atclose_invoke",
                None,
                outcome.label(),
                format!("seq={seq}"),
            );
        }

        let debug_view = self.debug.lock().clone();
        let report = self.plan.run(&mut TermObserver {
            debug: &debug_view,
            log: &self.log,
        });
        drop(debug_view);

        let result = if let Some(err) = sandbox_failure.filter(|_| report.converged) {
            self.record(LogLevel::Error, "shutdown", None, "sandbox_failed", err.to_string());
            Err(LibError::Sandbox(err))
        } else if report.converged {
            self.record(
                LogLevel::Info,
                "shutdown",
                None,
                "converged",
                format!("sweeps={}", report.sweeps),
            );
            Ok(Some(report))
        } else {
            self.record(
                LogLevel::Error,
                "shutdown",
                None,
                "diverged",
                format!("sweeps={};stuck={}", report.sweeps, report.stuck.join(",")),
            );
            if error_stack::auto_report() {
                self.config.diagnostics.with_writer(|diag| {
                    let _ = writeln!(diag, "h5rt: infinite loop closing library");
                    let _ = writeln!(diag, "      {}", report.summary);
                    if self.config.shutdown_policy == FatalPolicy::Abort {
                        let _ = diag.flush();
                        std::process::abort();
                    }
                });
            }
            Err(report.diverged_error())
        };

        self.debug.lock().close_streams();
        self.atclose.lock().clear();
        self.set_state(LifecycleState::Uninitialized);
        self.record(LogLevel::Info, "close", None, "terminated", "");
        result
    }

    /// Release cached free-list memory.
    pub fn garbage_collect(&self) -> Result<usize> {
        self.ensure_open()?;
        let _cx = self.enter_api("h5rt_garbage_collect");
        let freed = memory::garbage_collect();
        self.record(LogLevel::Debug, "garbage_collect", Some("FL"), "ok", format!("freed={freed}"));
        Ok(freed)
    }

    /// Set free-list ceilings; negative values are unlimited.
    pub fn set_free_list_limits(
        &self,
        reg_global: i64,
        reg_list: i64,
        arr_global: i64,
        arr_list: i64,
        blk_global: i64,
        blk_list: i64,
    ) -> Result<()> {
        self.ensure_open()?;
        let _cx = self.enter_api("h5rt_set_free_list_limits");
        memory::set_limits(reg_global, reg_list, arr_global, arr_list, blk_global, blk_list);
        self.record(
            LogLevel::Debug,
            "set_free_list_limits",
            Some("FL"),
            "ok",
            format!("{reg_global},{reg_list},{arr_global},{arr_list},{blk_global},{blk_list}"),
        );
        Ok(())
    }

    pub fn free_list_sizes(&self) -> Result<FreeListSizes> {
        self.ensure_open()?;
        let _cx = self.enter_api("h5rt_get_free_list_sizes");
        Ok(memory::sizes())
    }

    /// Inspect the current debug configuration.
    pub fn with_debug<R>(&self, f: impl FnOnce(&DebugConfig) -> R) -> R {
        f(&self.debug.lock())
    }

    #[must_use]
    pub fn log_snapshot(&self) -> Vec<LifecycleLogRecord> {
        self.log.lock().snapshot()
    }

    pub fn drain_log(&self) -> Vec<LifecycleLogRecord> {
        self.log.lock().drain()
    }

    /// Write the retained log as JSONL.
    pub fn write_log_jsonl(&self, out: &mut dyn Write) -> std::io::Result<()> {
        self.log.lock().write_jsonl(out)
    }
}

struct TermObserver<'a> {
    debug: &'a DebugConfig,
    log: &'a Mutex<LifecycleLog>,
}

impl SweepObserver for TermObserver<'_> {
    fn step_done(&mut self, sweep: usize, step: &TermStep, pending: usize) {
        if pending == 0 {
            return;
        }
        if let Some(stream) = step
            .debug_package()
            .and_then(|pkg| self.debug.package_stream(pkg))
        {
            stream.emit(format_args!(
                "{}: term_package pending={pending} sweep={sweep}\n",
                step.label()
            ));
        }
        self.log.lock().record(
            LogLevel::Debug,
            "term_step",
            Some(step.label()),
            "pending",
            format!("sweep={sweep};pending={pending}"),
        );
    }

    fn sweep_done(&mut self, sweep: usize, pending: usize) {
        self.log.lock().record(
            LogLevel::Trace,
            "sweep",
            None,
            if pending == 0 { "quiescent" } else { "pending" },
            format!("sweep={sweep};pending={pending}"),
        );
    }
}

static LIBRARY: OnceLock<Library> = OnceLock::new();

/// The process-wide library.
pub fn library() -> &'static Library {
    LIBRARY.get_or_init(|| Library::new(LibraryConfig::process()))
}

/// Finalizer installed with `atexit`.
pub extern "C" fn terminate_at_exit() {
    let _ = panic::catch_unwind(|| {
        if let Some(lib) = LIBRARY.get() {
            let _ = lib.terminate();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_hook::NoExitHook;
    use crate::subsystem::{Subsystem, SubsystemId};
    use std::sync::atomic::AtomicUsize;

    extern "C" fn noop_finalizer() {}

    fn isolated() -> LibraryConfig {
        LibraryConfig::process()
            .with_version_policy(FatalPolicy::Report)
            .with_shutdown_policy(FatalPolicy::Report)
            .with_version_level(VersionCheckLevel::Abort)
            .with_debug_flags(None)
            .with_exit_hook(Arc::new(NoExitHook))
            .with_finalizer(noop_finalizer)
            .with_diagnostics(Diagnostics::capture().0)
    }

    #[derive(Default)]
    struct Reentrant {
        lib: OnceLock<Arc<Library>>,
        observed: AtomicUsize,
    }

    impl Subsystem for Reentrant {
        fn init(&self) -> std::result::Result<(), crate::error::SubsystemError> {
            if let Some(lib) = self.lib.get() {
                assert_eq!(lib.lifecycle_state(), LifecycleState::Initializing);
                lib.open()?;
                self.observed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
        fn term_package(&self) -> usize {
            0
        }
    }

    #[test]
    fn reentrant_open_during_init_is_noop() {
        let sub = Arc::new(Reentrant::default());
        let table = SubsystemTable::new().with(SubsystemId::O, sub.clone());
        let lib = Arc::new(Library::new(isolated().with_subsystems(table)));
        assert!(sub.lib.set(Arc::clone(&lib)).is_ok());
        lib.open().unwrap();
        assert_eq!(sub.observed.load(Ordering::SeqCst), 1);
        assert!(lib.is_initialized());
        lib.terminate().unwrap();
    }

    #[test]
    fn state_flags_follow_lifecycle() {
        let lib = Library::new(isolated());
        assert_eq!(lib.state(), LibraryState::default());
        lib.open().unwrap();
        let s = lib.state();
        assert!(s.initialized && !s.terminating && s.suppress_auto_shutdown);
        lib.terminate().unwrap();
        assert!(!lib.state().initialized);
    }

    #[test]
    fn terminate_from_atclose_callback_is_noop() {
        let lib = Arc::new(Library::new(isolated()));
        let inner = Arc::clone(&lib);
        let seen = Arc::new(Mutex::new(None));
        let seen_cb = Arc::clone(&seen);
        lib.atclose(Some(Box::new(move || {
            *seen_cb.lock() = Some((inner.is_terminating(), inner.terminate().ok().flatten()));
        })))
        .unwrap();
        assert!(lib.terminate().unwrap().is_some());
        let (terminating, nested) = seen.lock().take().unwrap();
        assert!(terminating);
        assert!(nested.is_none());
    }

    #[cfg(unix)]
    fn debug_log(tag: &str) -> (std::fs::File, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("h5rt-{tag}-{}.log", std::process::id()));
        (std::fs::File::create(&path).unwrap(), path)
    }

    #[cfg(unix)]
    fn read_log(path: &std::path::Path) -> String {
        let text = std::fs::read_to_string(path).unwrap();
        let _ = std::fs::remove_file(path);
        text
    }

    #[cfg(unix)]
    #[test]
    fn ttop_traces_only_top_level_entries() {
        use std::os::fd::AsRawFd;

        let (file, path) = debug_log("ttop");
        let mask = format!("{} ttop", file.as_raw_fd());
        let lib = Library::new(isolated().with_debug_flags(Some(&mask)));
        lib.open().unwrap();
        // Already open: traced, but does nothing else.
        lib.open().unwrap();
        let outer = lib.enter_api("outer");
        let inner = lib.enter_api("inner");
        drop(inner);
        drop(outer);
        lib.terminate().unwrap();

        assert_eq!(read_log(&path), "h5rt_open()\nouter()\nh5rt_close()\n");
    }

    #[cfg(unix)]
    #[test]
    fn ttimes_prefixes_every_entry_with_elapsed_seconds() {
        use std::os::fd::AsRawFd;

        let (file, path) = debug_log("ttimes");
        let mask = format!("{} ttimes", file.as_raw_fd());
        let lib = Library::new(isolated().with_debug_flags(Some(&mask)));
        lib.open().unwrap();
        {
            let _outer = lib.enter_api("outer");
            let _inner = lib.enter_api("inner");
        }
        lib.terminate().unwrap();

        let text = read_log(&path);
        let names: Vec<_> = text
            .lines()
            .map(|line| {
                let (stamp, name) = line.strip_prefix('@').unwrap().split_once(' ').unwrap();
                assert!(stamp.parse::<f64>().unwrap() >= 0.0, "{line}");
                name
            })
            .collect();
        assert_eq!(names, ["outer()", "inner()", "h5rt_close()"]);
    }

    struct BusyOnce(AtomicBool);

    impl Subsystem for BusyOnce {
        fn term_package(&self) -> usize {
            usize::from(!self.0.swap(true, Ordering::SeqCst))
        }
    }

    #[cfg(unix)]
    #[test]
    fn package_stream_receives_pending_term_results() {
        use std::os::fd::AsRawFd;

        let (file, path) = debug_log("pkg");
        let mask = format!("{} t", file.as_raw_fd());
        let table = SubsystemTable::inert()
            .with(SubsystemId::T, Arc::new(BusyOnce(AtomicBool::new(false))))
            .with(SubsystemId::D, Arc::new(BusyOnce(AtomicBool::new(false))));
        let lib = Library::new(
            isolated()
                .with_subsystems(table)
                .with_debug_flags(Some(&mask)),
        );
        lib.open().unwrap();
        assert_eq!(lib.terminate().unwrap().unwrap().sweeps, 2);

        // D reported work too, but its package stream was never enabled.
        assert_eq!(read_log(&path), "T: term_package pending=1 sweep=1\n");
    }

    #[test]
    fn log_captures_open_and_close() {
        let lib = Library::new(isolated());
        lib.open().unwrap();
        lib.terminate().unwrap();
        let events: Vec<_> = lib.log_snapshot().iter().map(|r| r.event).collect();
        assert!(events.contains(&"version_check"));
        assert!(events.contains(&"open"));
        assert!(events.contains(&"shutdown"));
        assert_eq!(events.last(), Some(&"close"));
        let mut out = Vec::new();
        lib.write_log_jsonl(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().lines().count() >= 4);
    }
}

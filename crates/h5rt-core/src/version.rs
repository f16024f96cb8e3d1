//! Header/library version compatibility guard.
//!
//! Major and minor numbers must match exactly. Release numbers are
//! compatible unless either side appears in [`VERS_RELEASE_EXCEPTIONS`].
//! The response to a mismatch is governed by
//! [`VersionCheckLevel`](crate::config::VersionCheckLevel) and, at the
//! aborting level, by an injectable [`FatalPolicy`].

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{VERSION_CHECK_ENV, VersionCheckLevel};
use crate::error::{LibError, MismatchKind, Result};

pub const VERS_MAJOR: u32 = 1;
pub const VERS_MINOR: u32 = 14;
pub const VERS_RELEASE: u32 = 6;
/// Empty for final releases.
pub const VERS_SUBRELEASE: &str = "";
pub const VERS_INFO: &str = "h5rt library version: 1.14.6";

/// Release numbers that are incompatible by design (develop snapshots).
pub const VERS_RELEASE_EXCEPTIONS: &[u32] = &[0];

const VERSION_MISMATCH_WARNING: &str = "\
Warning! ***h5rt library version mismatched error***
The h5rt header files used to compile this application do not match
the version used by the h5rt library to which this application is linked.
Data corruption or segmentation faults may occur if the application continues.
This can happen when an application was compiled by one version of h5rt but
linked with a different version of static or shared h5rt library.
";

const RELEASE_MISMATCH_WARNING: &str = "\
Warning! ***h5rt library release mismatched error***
The h5rt header files used to compile this application are not compatible with
the version used by the h5rt library to which this application is linked.
Data corruption or segmentation faults may occur if the application continues.
This can happen when an application was compiled by one version of h5rt but
linked with an incompatible version of static or shared h5rt library.
";

/// A `major.minor.release` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub release: u32,
}

impl Version {
    /// The running library.
    pub const LIBRARY: Self = Self::new(VERS_MAJOR, VERS_MINOR, VERS_RELEASE);

    #[must_use]
    pub const fn new(major: u32, minor: u32, release: u32) -> Self {
        Self {
            major,
            minor,
            release,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.release)
    }
}

/// What to do when an outcome is fatal under the active level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalPolicy {
    /// Terminate the process with `abort()`.
    Abort,
    /// Return an error to the caller instead.
    Report,
}

/// Outcome of a version check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionVerdict {
    /// A previous call already ran the check; nothing was compared.
    pub cached: bool,
    pub major_minor_mismatch: bool,
    pub release_exception: bool,
    /// A warning banner was written.
    pub warned: bool,
    /// `VERS_INFO` agrees with the numeric constants (only verified at the
    /// strictest level).
    pub info_consistent: bool,
}

/// Human-readable build description appended to mismatch diagnostics.
#[must_use]
pub fn build_settings() -> String {
    format!(
        "\t    h5rt build settings:\n\
         \t\tVersion: {}\n\
         \t\tProfile: {}\n\
         \t\tThreadsafe: {}\n\
         \t\tTarget: {}-{}\n",
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) { "debug" } else { "release" },
        if cfg!(feature = "threadsafe") { "yes" } else { "no" },
        std::env::consts::ARCH,
        std::env::consts::OS,
    )
}

/// Version string re-derived from the numeric constants.
#[must_use]
pub fn derived_info_string() -> String {
    let dash = if VERS_SUBRELEASE.is_empty() { "" } else { "-" };
    format!(
        "h5rt library version: {}.{}.{}{}{}",
        VERS_MAJOR, VERS_MINOR, VERS_RELEASE, dash, VERS_SUBRELEASE
    )
}

fn release_hits_exception(headers: u32, library: u32) -> bool {
    headers != library
        && VERS_RELEASE_EXCEPTIONS
            .iter()
            .any(|&exception| exception == headers || exception == library)
}

/// Runs the compatibility check at most once per guard.
#[derive(Debug, Default)]
pub struct VersionGuard {
    checked: AtomicBool,
}

impl VersionGuard {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            checked: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::Acquire)
    }

    /// Compare `headers` with the running library.
    ///
    /// Under [`VersionCheckLevel::Abort`] an incompatibility ends the process
    /// when `policy` is [`FatalPolicy::Abort`]; with [`FatalPolicy::Report`]
    /// it returns [`LibError::VersionIncompatible`] and leaves the guard
    /// unchecked.
    pub fn check(
        &self,
        headers: Version,
        level: VersionCheckLevel,
        policy: FatalPolicy,
        diag: &mut dyn Write,
    ) -> Result<VersionVerdict> {
        if self.is_checked() {
            return Ok(VersionVerdict {
                cached: true,
                info_consistent: true,
                ..VersionVerdict::default()
            });
        }
        let library = Version::LIBRARY;
        let mut verdict = VersionVerdict {
            info_consistent: true,
            ..VersionVerdict::default()
        };

        if headers.major != library.major || headers.minor != library.minor {
            verdict.major_minor_mismatch = true;
            verdict.warned |= respond(
                MismatchKind::MajorMinor,
                headers,
                level,
                policy,
                diag,
            )?;
        }

        if release_hits_exception(headers.release, library.release) {
            verdict.release_exception = true;
            verdict.warned |= respond(MismatchKind::Release, headers, level, policy, diag)?;
        }

        self.checked.store(true, Ordering::Release);

        if level == VersionCheckLevel::Abort {
            let derived = derived_info_string();
            if derived != VERS_INFO {
                verdict.info_consistent = false;
                let _ = write!(
                    diag,
                    "Warning!  Library version information error.\n\
                     The h5rt library version information are not consistent in its source code.\n\
                     This is NOT a fatal error but should be corrected.  Setting the environment\n\
                     variable '{VERSION_CHECK_ENV}' to a value of 1 will suppress\n\
                     this warning.\n\
                     Library version information are:\n\
                     VERS_MAJOR={VERS_MAJOR}, VERS_MINOR={VERS_MINOR}, VERS_RELEASE={VERS_RELEASE}, \
                     VERS_SUBRELEASE={VERS_SUBRELEASE},\nVERS_INFO={VERS_INFO}\n"
                );
            }
        }
        Ok(verdict)
    }
}

/// Emit the level-appropriate diagnostic. Returns whether anything was
/// written; fatal outcomes abort or return an error per `policy`.
fn respond(
    kind: MismatchKind,
    headers: Version,
    level: VersionCheckLevel,
    policy: FatalPolicy,
    diag: &mut dyn Write,
) -> Result<bool> {
    let library = Version::LIBRARY;
    let banner = match kind {
        MismatchKind::MajorMinor => VERSION_MISMATCH_WARNING,
        MismatchKind::Release => RELEASE_MISMATCH_WARNING,
    };
    // Build settings accompany major/minor mismatches only.
    let settings = match kind {
        MismatchKind::MajorMinor => build_settings(),
        MismatchKind::Release => String::new(),
    };
    match level {
        VersionCheckLevel::Abort => {
            let _ = write!(
                diag,
                "{banner}You can, at your own risk, disable this warning by setting the environment\n\
                 variable '{VERSION_CHECK_ENV}' to a value of '1'.\n\
                 Setting it to 2 or higher will suppress the warning messages totally.\n\
                 Headers are {headers}, library is {library}\n{settings}"
            );
            match policy {
                FatalPolicy::Abort => {
                    let _ = diag.write_all(b"Bye...\n");
                    let _ = diag.flush();
                    std::process::abort();
                }
                FatalPolicy::Report => Err(LibError::VersionIncompatible {
                    kind,
                    headers,
                    library,
                }),
            }
        }
        VersionCheckLevel::Warn => {
            let _ = write!(
                diag,
                "{banner}'{VERSION_CHECK_ENV}' environment variable is set to {}, application will\n\
                 continue at your own risk.\n\
                 Headers are {headers}, library is {library}\n{settings}",
                level.as_numeric()
            );
            Ok(true)
        }
        VersionCheckLevel::Silent => Ok(false),
    }
}

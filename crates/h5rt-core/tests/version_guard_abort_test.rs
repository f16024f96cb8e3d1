//! Process-level behaviour of the version guard.
//!
//! The aborting path can only be observed from outside the process, so each
//! case re-executes this test binary, running a single child probe with the
//! override level set in its environment.

use std::process::{Command, Output};
use std::sync::Arc;

use h5rt_core::config::VERSION_CHECK_ENV;
use h5rt_core::exit_hook::NoExitHook;
use h5rt_core::version::{VERS_MINOR, VERS_RELEASE};
use h5rt_core::{Library, LibraryConfig, Version};

const CHILD_ENV: &str = "H5RT_VERSION_GUARD_CHILD";

fn run_child(level: &str) -> Output {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args(["--exact", "child_probe_major_mismatch", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .env(VERSION_CHECK_ENV, level)
        .output()
        .expect("spawn child")
}

/// Child side: does nothing unless spawned by one of the tests below.
#[test]
fn child_probe_major_mismatch() {
    if std::env::var_os(CHILD_ENV).is_none() {
        return;
    }
    let lib = Library::new(LibraryConfig::process().with_exit_hook(Arc::new(NoExitHook)));
    let _ = lib.check_version(Version::new(2, VERS_MINOR, VERS_RELEASE));
    eprintln!("child survived");
}

#[test]
fn major_mismatch_aborts_at_default_level() {
    let out = run_child("0");
    assert!(!out.status.success());
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(out.status.signal(), Some(libc::SIGABRT));
    }
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("version mismatched error"), "{stderr}");
    assert!(stderr.contains("Headers are 2."), "{stderr}");
    assert!(stderr.contains("Bye..."), "{stderr}");
    assert!(!stderr.contains("child survived"));
}

#[test]
fn warn_level_continues_with_warning() {
    let out = run_child("1");
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("application will\ncontinue at your own risk"), "{stderr}");
    assert!(stderr.contains("child survived"));
}

#[test]
fn silent_level_neither_prints_nor_aborts() {
    let out = run_child("2");
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!stderr.contains("Warning"), "{stderr}");
    assert!(stderr.contains("child survived"));
}

#[test]
fn non_numeric_override_keeps_default() {
    let out = run_child("yes");
    assert!(!out.status.success());
}

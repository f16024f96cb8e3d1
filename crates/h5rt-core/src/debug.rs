//! Runtime debug-stream configuration.
//!
//! A debug mask is a sequence of tokens:
//!
//! - a descriptor number (C integer syntax) opens a stream on that
//!   descriptor and makes it current for the tokens that follow;
//! - `[+|-]name` enables (`+`, the default) or clears a package stream, or
//!   one of the reserved names `all`, `trace`, `ttop`, `ttimes`.
//!
//! Any other character is skipped. The current stream starts at stderr for
//! each call to [`DebugConfig::apply`].

use std::fmt;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::parse_c_integer;

/// Names longer than this are truncated before lookup.
pub const MAX_PACKAGE_NAME: usize = 31;

/// Fixed table of debug package names.
pub const PACKAGE_NAMES: [&str; 20] = [
    "a", "ac", "b", "d", "e", "f", "g", "hg", "hl", "i", "m", "mf", "mm", "o", "p", "s", "t", "v",
    "vl", "z",
];

/// Index of `name` in [`PACKAGE_NAMES`].
#[must_use]
pub fn package_index(name: &str) -> Option<usize> {
    PACKAGE_NAMES.iter().position(|&p| p == name)
}

/// Line-buffered stream over a duplicated descriptor.
pub struct DescriptorStream {
    fd: i32,
    writer: Mutex<LineWriter<File>>,
}

impl fmt::Debug for DescriptorStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorStream")
            .field("fd", &self.fd)
            .finish_non_exhaustive()
    }
}

/// Destination for debug and trace output.
#[derive(Debug, Clone)]
pub enum DebugStream {
    Stderr,
    Descriptor(Arc<DescriptorStream>),
}

impl PartialEq for DebugStream {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Stderr, Self::Stderr) => true,
            (Self::Descriptor(a), Self::Descriptor(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl DebugStream {
    /// Descriptor number as requested in the mask, if not stderr.
    #[must_use]
    pub fn descriptor(&self) -> Option<i32> {
        match self {
            Self::Stderr => None,
            Self::Descriptor(s) => Some(s.fd),
        }
    }

    /// Best-effort formatted write; errors are dropped.
    pub fn emit(&self, args: fmt::Arguments<'_>) {
        match self {
            Self::Stderr => {
                let _ = io::stderr().lock().write_fmt(args);
            }
            Self::Descriptor(s) => {
                let _ = s.writer.lock().write_fmt(args);
            }
        }
    }

    fn flush(&self) {
        match self {
            Self::Stderr => {
                let _ = io::stderr().flush();
            }
            Self::Descriptor(s) => {
                let _ = s.writer.lock().flush();
            }
        }
    }
}

/// Result of applying a mask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugParseReport {
    /// Unknown package names (already reported to diagnostics).
    pub ignored: Vec<String>,
    /// Descriptors that were opened and tracked.
    pub opened: Vec<i32>,
    /// Descriptor tokens that could not be opened.
    pub failed_descriptors: Vec<u64>,
}

/// Per-package streams plus the global trace switches.
#[derive(Debug, Clone, Default)]
pub struct DebugConfig {
    packages: [Option<DebugStream>; PACKAGE_NAMES.len()],
    trace: Option<DebugStream>,
    ttop: bool,
    ttimes: bool,
    open_streams: Vec<DebugStream>,
}

impl DebugConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn package_stream(&self, name: &str) -> Option<&DebugStream> {
        package_index(name).and_then(|i| self.packages[i].as_ref())
    }

    #[must_use]
    pub fn package_enabled(&self, name: &str) -> bool {
        self.package_stream(name).is_some()
    }

    /// Packages with an enabled stream.
    pub fn enabled_packages(&self) -> impl Iterator<Item = &'static str> + '_ {
        PACKAGE_NAMES
            .iter()
            .zip(self.packages.iter())
            .filter(|(_, s)| s.is_some())
            .map(|(name, _)| *name)
    }

    #[must_use]
    pub fn trace(&self) -> Option<&DebugStream> {
        self.trace.as_ref()
    }

    /// Trace only top-level API calls.
    #[must_use]
    pub fn ttop(&self) -> bool {
        self.ttop
    }

    /// Annotate trace lines with elapsed time.
    #[must_use]
    pub fn ttimes(&self) -> bool {
        self.ttimes
    }

    #[must_use]
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.len()
    }

    /// Apply a debug mask. Unknown names are written to `diag`.
    pub fn apply(&mut self, mask: &str, diag: &mut dyn Write) -> DebugParseReport {
        let bytes = mask.as_bytes();
        let mut report = DebugParseReport::default();
        let mut stream = DebugStream::Stderr;
        let mut pos = 0;

        while pos < bytes.len() {
            let c = bytes[pos];
            if c.is_ascii_alphabetic() || c == b'-' || c == b'+' {
                let clear = c == b'-';
                if c == b'-' || c == b'+' {
                    pos += 1;
                }
                let start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
                    pos += 1;
                }
                let end = pos.min(start + MAX_PACKAGE_NAME);
                let name = &mask[start..end];
                let target = if clear { None } else { Some(stream.clone()) };

                match name {
                    "trace" => self.trace = target,
                    "ttop" => {
                        self.trace = Some(stream.clone());
                        self.ttop = !clear;
                    }
                    "ttimes" => {
                        self.trace = Some(stream.clone());
                        self.ttimes = !clear;
                    }
                    "all" => {
                        for slot in &mut self.packages {
                            *slot = target.clone();
                        }
                    }
                    _ => match package_index(name) {
                        Some(i) => self.packages[i] = target,
                        None => {
                            let _ = writeln!(diag, "H5RT_DEBUG: ignored {name}");
                            report.ignored.push(name.to_owned());
                        }
                    },
                }
            } else if c.is_ascii_digit() {
                let (value, consumed) = parse_c_integer(&bytes[pos..]);
                pos += consumed.max(1);
                match i32::try_from(value).ok().and_then(open_descriptor) {
                    Some(opened) => {
                        stream = opened.clone();
                        self.open_streams.push(opened);
                        report.opened.push(value as i32);
                    }
                    None => report.failed_descriptors.push(value),
                }
            } else {
                pos += 1;
            }
        }
        report
    }

    /// Flush and release every opened stream, newest first, and drop all
    /// package and trace references to them. Close errors are not surfaced.
    pub fn close_streams(&mut self) {
        while let Some(stream) = self.open_streams.pop() {
            stream.flush();
        }
        for slot in self.packages.iter_mut().chain(std::iter::once(&mut self.trace)) {
            if matches!(slot, Some(DebugStream::Descriptor(_))) {
                *slot = None;
            }
        }
    }
}

/// Duplicate `fd` into a line-buffered stream we own.
///
/// The caller's descriptor stays open; only the duplicate is closed at
/// termination. Fails when `fd` is not open for writing.
#[cfg(unix)]
#[allow(unsafe_code)]
fn open_descriptor(fd: i32) -> Option<DebugStream> {
    use std::os::fd::FromRawFd;

    if fd < 0 {
        return None;
    }
    // SAFETY: F_GETFL only queries descriptor flags; an invalid fd yields -1.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || flags & libc::O_ACCMODE == libc::O_RDONLY {
        return None;
    }
    // SAFETY: fd was just validated as open; F_DUPFD_CLOEXEC returns a fresh
    // descriptor that no one else owns, or -1.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return None;
    }
    // SAFETY: `dup` is a newly created descriptor owned exclusively here.
    let file = unsafe { File::from_raw_fd(dup) };
    Some(DebugStream::Descriptor(Arc::new(DescriptorStream {
        fd,
        writer: Mutex::new(LineWriter::new(file)),
    })))
}

#[cfg(not(unix))]
fn open_descriptor(_fd: i32) -> Option<DebugStream> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(config: &mut DebugConfig, mask: &str) -> (DebugParseReport, String) {
        let mut diag = Vec::new();
        let report = config.apply(mask, &mut diag);
        (report, String::from_utf8(diag).unwrap())
    }

    #[test]
    fn clear_all_then_trace_ttop() {
        let mut config = DebugConfig::new();
        apply(&mut config, "all");
        assert_eq!(config.enabled_packages().count(), PACKAGE_NAMES.len());

        let (report, diag) = apply(&mut config, "-all trace ttop");
        assert!(report.ignored.is_empty());
        assert!(diag.is_empty());
        assert_eq!(config.enabled_packages().count(), 0);
        assert_eq!(config.trace(), Some(&DebugStream::Stderr));
        assert!(config.ttop());
        assert!(!config.ttimes());
    }

    #[test]
    fn signs_toggle_single_packages() {
        let mut config = DebugConfig::new();
        apply(&mut config, "+t,vl;-t mf");
        assert!(!config.package_enabled("t"));
        assert!(config.package_enabled("vl"));
        assert!(config.package_enabled("mf"));
    }

    #[test]
    fn clearing_ttop_keeps_trace_on() {
        let mut config = DebugConfig::new();
        apply(&mut config, "-ttop");
        assert!(config.trace().is_some());
        assert!(!config.ttop());
        apply(&mut config, "-trace ttimes");
        assert!(config.trace().is_some());
        assert!(config.ttimes());
        apply(&mut config, "-trace");
        assert!(config.trace().is_none());
    }

    #[test]
    fn unknown_names_are_reported_and_ignored() {
        let mut config = DebugConfig::new();
        let (report, diag) = apply(&mut config, "bogus +a");
        assert_eq!(report.ignored, vec!["bogus".to_owned()]);
        assert_eq!(diag, "H5RT_DEBUG: ignored bogus\n");
        assert!(config.package_enabled("a"));
    }

    #[test]
    fn long_names_are_truncated_before_lookup() {
        let mut config = DebugConfig::new();
        let long = "x".repeat(40);
        let (report, _) = apply(&mut config, &long);
        assert_eq!(report.ignored[0].len(), MAX_PACKAGE_NAME);
    }

    #[test]
    fn unparseable_characters_are_skipped() {
        let mut config = DebugConfig::new();
        let (report, _) = apply(&mut config, "  ,;:* e !! z");
        assert!(report.ignored.is_empty());
        assert!(config.package_enabled("e"));
        assert!(config.package_enabled("z"));
    }

    #[test]
    fn failed_descriptor_leaves_stream_unchanged() {
        let mut config = DebugConfig::new();
        let (report, _) = apply(&mut config, "987654 t");
        assert_eq!(report.failed_descriptors, vec![987654]);
        assert_eq!(config.open_stream_count(), 0);
        assert_eq!(config.package_stream("t"), Some(&DebugStream::Stderr));
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_token_redirects_following_packages() {
        use std::os::fd::AsRawFd;

        let path = std::env::temp_dir().join(format!("h5rt-debug-{}.log", std::process::id()));
        let file = File::create(&path).unwrap();
        let fd = file.as_raw_fd();

        let mut config = DebugConfig::new();
        let (report, _) = apply(&mut config, &format!("e {fd} t"));
        assert_eq!(report.opened, vec![fd]);
        assert_eq!(config.open_stream_count(), 1);
        assert_eq!(config.package_stream("e"), Some(&DebugStream::Stderr));
        let t = config.package_stream("t").cloned().unwrap();
        assert_eq!(t.descriptor(), Some(fd));

        t.emit(format_args!("H5T: closed 3\n"));
        config.close_streams();
        assert_eq!(config.open_stream_count(), 0);
        assert!(config.package_stream("t").is_none());
        assert!(config.package_enabled("e"));
        drop(t);

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "H5T: closed 3\n");
        // The caller's descriptor is still usable.
        let mut still_open = &file;
        still_open.write_all(b"ok\n").unwrap();
        let _ = std::fs::remove_file(&path);
    }
}

//! A small, dependency-free logging facility, in the same spirit as the
//! original's `laik_log`/`laik_set_loglevel`: a severity threshold, an
//! optional tid-range filter (so a large run's log doesn't drown in every
//! rank's chatter), and a destination that's either stderr or a file.
//! Structured dumps go through `serde_json`, the only logging-adjacent
//! crate the teacher itself reaches for.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Panic,
}

impl LogLevel {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            3 => LogLevel::Error,
            _ => LogLevel::Panic,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Panic => "panic",
        };
        write!(f, "{s}")
    }
}

enum Sink {
    Stderr,
    File(Mutex<File>),
}

/// The active logger for one process. Built once from `Config` and stashed
/// in the `Instance`; cheap to clone-share via `Arc` since the sink is
/// behind its own lock.
pub struct Logger {
    level: LogLevel,
    tid_range: Option<(u32, u32)>,
    my_tid: u32,
    sink: Sink,
}

impl Logger {
    pub fn new(level: LogLevel, tid_range: Option<(u32, u32)>, my_tid: u32, file: Option<&str>) -> Self {
        let sink = match file {
            Some(path) => Sink::File(Mutex::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .unwrap_or_else(|e| panic!("cannot open log file {path}: {e}")),
            )),
            None => Sink::Stderr,
        };
        Logger { level, tid_range, my_tid, sink }
    }

    fn tid_in_range(&self) -> bool {
        match self.tid_range {
            None => true,
            Some((from, to)) => self.my_tid >= from && self.my_tid <= to,
        }
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        if level < self.level || !self.tid_in_range() {
            return;
        }
        let line = format!("[{level}] tid{} {msg}\n", self.my_tid);
        match &self.sink {
            Sink::Stderr => {
                let _ = std::io::stderr().write_all(line.as_bytes());
            }
            Sink::File(f) => {
                if let Ok(mut f) = f.lock() {
                    let _ = f.write_all(line.as_bytes());
                }
            }
        }
    }

    /// Logs a structured event as one JSON line, for callers (the action
    /// optimizer's stats, a transition summary) that want machine-parseable
    /// output rather than a prose message.
    pub fn log_json<T: Serialize>(&self, level: LogLevel, tag: &str, value: &T) {
        if level < self.level || !self.tid_in_range() {
            return;
        }
        match serde_json::to_string(value) {
            Ok(json) => self.log(level, &format!("{tag} {json}")),
            Err(e) => self.log(LogLevel::Error, &format!("failed to serialize {tag}: {e}")),
        }
    }

    /// Logs at `Panic` level, then panics with the same message — the
    /// engine's own equivalent of `laik_panic`, used for invariant
    /// violations this crate considers unrecoverable (spec's "recovery is
    /// unsafe" stance).
    pub fn panic(&self, msg: &str) -> ! {
        self.log(LogLevel::Panic, msg);
        panic!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_filters_below_threshold() {
        assert!(LogLevel::Debug < LogLevel::Warning);
        assert!(LogLevel::Panic > LogLevel::Error);
    }

    #[test]
    fn tid_range_gate() {
        let logger = Logger::new(LogLevel::Debug, Some((2, 4)), 5, None);
        assert!(!logger.tid_in_range());
        let logger = Logger::new(LogLevel::Debug, Some((2, 4)), 3, None);
        assert!(logger.tid_in_range());
    }
}

//! Runtime configuration parsed from environment variables, mirroring the
//! knobs the original C implementation reads at `laik_init` time. Grounded
//! on spec's external-interfaces table; struct/`Default` shape modeled on
//! the teacher's `checkpoint::CheckpointConfig`.

use std::env;

use crate::log::LogLevel;

#[derive(Debug, Clone)]
pub struct Config {
    /// Overrides the discovered group size (`LAIK_SIZE`); mainly useful for
    /// running the `testing::LocalBackend` harness outside a real launcher.
    pub size: Option<u32>,
    /// Minimum level logged, plus an optional tid range log output is
    /// restricted to (`LAIK_LOG=level[:from[-to]]`).
    pub log_level: LogLevel,
    pub log_tid_range: Option<(u32, u32)>,
    /// Redirect log output to a file instead of stderr (`LAIK_LOG_FILE`).
    pub log_file: Option<String>,
    /// Forces the TCP backend's known reduce-on-<32-tasks code path for
    /// regression testing (`LAIK_MPI_BUG`).
    pub mpi_bug_workaround: bool,
    /// Caps how many tasks a single reduce action can address before the
    /// `split_oversized_reduces` pass must cut it up for the TCP backend
    /// (`LAIK_TCP_REDUCE`).
    pub tcp_reduce_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            size: None,
            log_level: LogLevel::Warning,
            log_tid_range: None,
            log_file: None,
            mpi_bug_workaround: false,
            tcp_reduce_limit: None,
        }
    }
}

impl Config {
    /// Reads `LAIK_SIZE`, `LAIK_LOG`, `LAIK_LOG_FILE`, `LAIK_MPI_BUG`, and
    /// `LAIK_TCP_REDUCE` from the process environment, falling back to
    /// `Default` for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(s) = env::var("LAIK_SIZE") {
            cfg.size = s.parse().ok();
        }

        if let Ok(s) = env::var("LAIK_LOG") {
            let (level_str, range_str) = match s.split_once(':') {
                Some((l, r)) => (l, Some(r)),
                None => (s.as_str(), None),
            };
            if let Ok(level) = level_str.parse::<u8>() {
                cfg.log_level = LogLevel::from_code(level);
            }
            if let Some(range) = range_str {
                cfg.log_tid_range = parse_tid_range(range);
            }
        }

        if let Ok(f) = env::var("LAIK_LOG_FILE") {
            cfg.log_file = Some(f);
        }

        if env::var("LAIK_MPI_BUG").map(|v| v != "0").unwrap_or(false) {
            cfg.mpi_bug_workaround = true;
        }

        if let Ok(s) = env::var("LAIK_TCP_REDUCE") {
            cfg.tcp_reduce_limit = s.parse().ok();
        }

        cfg
    }
}

fn parse_tid_range(s: &str) -> Option<(u32, u32)> {
    match s.split_once('-') {
        Some((from, to)) => Some((from.parse().ok()?, to.parse().ok()?)),
        None => {
            let v: u32 = s.parse().ok()?;
            Some((v, v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_quiet() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, LogLevel::Warning);
        assert!(cfg.log_tid_range.is_none());
    }

    #[test]
    fn parses_single_tid_range() {
        assert_eq!(parse_tid_range("3"), Some((3, 3)));
    }

    #[test]
    fn parses_tid_interval() {
        assert_eq!(parse_tid_range("2-5"), Some((2, 5)));
    }
}

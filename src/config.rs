//! Named-value configuration consumed by the core.
//!
//! The format is the collaborator's `name value` line convention: one pair
//! per line, `#` starts a comment, durations are seconds with an optional
//! fractional part. Unknown names are logged and skipped so a shared
//! configuration file can carry values for other modules.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};

/// Connection arena size of a default build.
pub const MAX_CONNS: usize = 128;
/// Connection arena size of a high-fanout build.
pub const MAX_CONNS_HIGH_FANOUT: usize = 4096;

/// Configuration values the networking core consumes.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server TLS certificate chain (PEM).
    pub net_cert_file: Option<PathBuf>,
    /// Server TLS private key (PEM).
    pub net_key_file: Option<PathBuf>,
    /// Fallback certificate used when no production pair is set.
    pub net_cert_test_file: Option<PathBuf>,
    /// Fallback key used when no production pair is set.
    pub net_key_test_file: Option<PathBuf>,
    /// TLS shutdown deadline.
    pub net_ssl_shutdown_timeout: Duration,
    /// TLS handshake deadline for outgoing connections.
    pub net_ssl_establish_timeout: Duration,
    /// TLS handshake deadline for accepted connections.
    pub net_ssl_accept_timeout: Duration,
    /// TCP connect deadline.
    pub net_establish_timeout: Duration,
    /// Drain deadline for flush-and-close shutdowns.
    pub net_flush_and_close_timeout: Duration,
    /// Server-side deadline for answering the pipeline head.
    pub http_response_timeout: Duration,
    /// Watchdog tick inspecting the pipeline head.
    pub http_check_messages_queue_interval: Duration,
    /// Use the high-fanout connection arena.
    pub high_fanout: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            net_cert_file: None,
            net_key_file: None,
            net_cert_test_file: None,
            net_key_test_file: None,
            net_ssl_shutdown_timeout: Duration::from_secs(1),
            net_ssl_establish_timeout: Duration::from_secs(1),
            net_ssl_accept_timeout: Duration::from_secs(1),
            net_establish_timeout: Duration::from_secs(1),
            net_flush_and_close_timeout: Duration::from_secs(1),
            http_response_timeout: Duration::from_secs(10),
            http_check_messages_queue_interval: Duration::from_secs(5),
            high_fanout: false,
        }
    }
}

impl Config {
    /// Loads named values from `path` over the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let text = fs::read_to_string(path)?;
        let mut cfg = Config::default();

        for (ndx, raw_line) in text.lines().enumerate() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => raw_line.trim(),
            };
            if line.is_empty() {
                continue;
            }

            let (name, value) = line.split_once(char::is_whitespace).ok_or_else(|| {
                warn!("config line {} has no value: {}", ndx + 1, raw_line);
                Error::WrongParams
            })?;
            let value = value.trim();

            match name {
                "net_cert_file" => cfg.net_cert_file = Some(PathBuf::from(value)),
                "net_key_file" => cfg.net_key_file = Some(PathBuf::from(value)),
                "net_cert_test_file" => cfg.net_cert_test_file = Some(PathBuf::from(value)),
                "net_key_test_file" => cfg.net_key_test_file = Some(PathBuf::from(value)),
                "net_ssl_shutdown_timeout" => {
                    cfg.net_ssl_shutdown_timeout = parse_duration(value)?
                }
                "net_ssl_establish_timeout" => {
                    cfg.net_ssl_establish_timeout = parse_duration(value)?
                }
                "net_ssl_accept_timeout" => cfg.net_ssl_accept_timeout = parse_duration(value)?,
                "net_establish_timeout" => cfg.net_establish_timeout = parse_duration(value)?,
                "net_flush_and_close_timeout" => {
                    cfg.net_flush_and_close_timeout = parse_duration(value)?
                }
                "http_response_timeout" => cfg.http_response_timeout = parse_duration(value)?,
                "http_check_messages_queue_interval" => {
                    cfg.http_check_messages_queue_interval = parse_duration(value)?
                }
                "high_fanout" => cfg.high_fanout = value == "1" || value == "true",
                _ => {
                    // values for other modules share the file
                    warn!("config line {} ignored: {}", ndx + 1, name);
                }
            }
        }

        Ok(cfg)
    }

    /// Connection arena size for this configuration.
    pub fn max_conns(&self) -> usize {
        if self.high_fanout {
            MAX_CONNS_HIGH_FANOUT
        } else {
            MAX_CONNS
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration> {
    let secs: f64 = value.parse().map_err(|_| Error::WrongParams)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::WrongParams);
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::time::Duration;

    use super::Config;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = Config::default();
        assert_eq!(Duration::from_secs(1), cfg.net_establish_timeout);
        assert_eq!(Duration::from_secs(1), cfg.net_flush_and_close_timeout);
        assert_eq!(Duration::from_secs(10), cfg.http_response_timeout);
        assert_eq!(
            Duration::from_secs(5),
            cfg.http_check_messages_queue_interval
        );
        assert_eq!(128, cfg.max_conns());
    }

    #[test]
    fn load_overrides_named_values() {
        let mut file = tempfile_path("skiff-config-load");
        writeln!(file.1, "# deadlines").unwrap();
        writeln!(file.1, "net_establish_timeout 2.5").unwrap();
        writeln!(file.1, "http_response_timeout 30").unwrap();
        writeln!(file.1, "net_cert_file /tmp/server.crt").unwrap();
        writeln!(file.1, "high_fanout 1").unwrap();
        writeln!(file.1, "logger_logfile /tmp/skiff.log # other module").unwrap();
        file.1.flush().unwrap();

        let cfg = Config::load(&file.0).unwrap();
        assert_eq!(Duration::from_millis(2500), cfg.net_establish_timeout);
        assert_eq!(Duration::from_secs(30), cfg.http_response_timeout);
        assert_eq!(
            Some(std::path::PathBuf::from("/tmp/server.crt")),
            cfg.net_cert_file
        );
        assert_eq!(4096, cfg.max_conns());

        std::fs::remove_file(&file.0).ok();
    }

    #[test]
    fn malformed_duration_is_rejected() {
        let mut file = tempfile_path("skiff-config-bad");
        writeln!(file.1, "net_establish_timeout soon").unwrap();
        file.1.flush().unwrap();

        assert!(Config::load(&file.0).is_err());
        std::fs::remove_file(&file.0).ok();
    }

    fn tempfile_path(tag: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!(
            "{}-{}.cfg",
            tag,
            std::process::id()
        ));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}

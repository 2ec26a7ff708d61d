//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **CLI flags**: `--listen`, `--workers`, set directly on [`Config`] by `main`.
//! 2. **Environment variables**: `REMBASH_LISTEN`, `REMBASH_SECRET`.
//! 3. **Config file**: path via `--config <path>`, or `rembashd.toml` in CWD.
//! 4. **Compiled defaults**: see each field's default value below.
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:4070"
//! backlog = 10
//! workers = 8
//! queue_capacity = 0
//! handshake_timeout_secs = 3
//! max_events = 24
//!
//! [shell]
//! program = "/bin/bash"
//! login = true
//!
//! [auth]
//! secret = "cs407rembash"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener, multiplexer and worker-pool sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:4070`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// `listen()` backlog (default 10, per the wire protocol's minimum).
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Fixed worker-pool size (default 8; spec calls for 4-16).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Worker queue bound. `0` means auto-size to `2 * (workers * 64)`.
    #[serde(default)]
    pub queue_capacity: usize,
    /// Seconds a client has to complete the handshake before being dropped (default 3).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Max events drained per `epoll_wait` batch (default 24).
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

/// Shell spawn defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary to run under the PTY (default `/bin/bash`, overridden by `$SHELL`
    /// when that path exists and is executable).
    #[serde(default = "default_shell")]
    pub program: String,
    /// Pass `-l` so the shell sources `.profile`/`.bashrc` like a login shell.
    #[serde(default = "default_login")]
    pub login: bool,
}

/// Handshake secret.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared secret clients must echo back (without the trailing newline,
    /// which is added on the wire). Override with `REMBASH_SECRET`.
    #[serde(default = "default_secret")]
    pub secret: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:4070".to_string()
}
fn default_backlog() -> i32 {
    10
}
fn default_workers() -> usize {
    8
}
fn default_handshake_timeout_secs() -> u64 {
    3
}
fn default_max_events() -> usize {
    24
}
fn default_shell() -> String {
    "/bin/bash".to_string()
}
fn default_login() -> bool {
    true
}
fn default_secret() -> String {
    "cs407rembash".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            workers: default_workers(),
            queue_capacity: 0,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_events: default_max_events(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell(),
            login: default_login(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            shell: ShellConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure, since a named but
    /// unreadable config file is almost certainly an operator error worth
    /// surfacing loudly at startup). Otherwise looks for `rembashd.toml` in the
    /// current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("rembashd.toml").exists() {
            let content =
                std::fs::read_to_string("rembashd.toml").expect("Failed to read rembashd.toml");
            toml::from_str(&content).expect("Failed to parse rembashd.toml")
        } else {
            Config::default()
        };

        if let Ok(secret) = std::env::var("REMBASH_SECRET") {
            config.auth.secret = secret;
        }
        if let Ok(listen) = std::env::var("REMBASH_LISTEN") {
            config.server.listen = listen;
        }

        config
    }

    /// Sanity-check values that would otherwise surface as a confusing runtime
    /// error much later (e.g. a worker pool of zero threads never servicing the
    /// queue).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.server.workers == 0 {
            errors.push("server.workers must be at least 1".to_string());
        }
        if self.server.max_events == 0 {
            errors.push("server.max_events must be at least 1".to_string());
        }
        if self.auth.secret.is_empty() {
            errors.push("auth.secret must not be empty".to_string());
        }
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "server.listen '{}' is not a valid address",
                self.server.listen
            ));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = Config::default();
        config.server.workers = 0;
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let mut config = Config::default();
        config.server.listen = "not-an-address".to_string();
        assert!(config.validate().iter().any(|e| e.contains("listen")));
    }

    #[test]
    fn load_reads_a_toml_file_and_falls_back_on_missing_fields() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
            [server]
            listen = "127.0.0.1:9000"
            workers = 3

            [auth]
            secret = "topsecret"
            "#
        )
        .unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap()));
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.workers, 3);
        assert_eq!(config.auth.secret, "topsecret");
        // Fields absent from the file keep their compiled defaults.
        assert_eq!(config.server.backlog, default_backlog());
        assert_eq!(config.shell.program, default_shell());
    }
}

//! Monitor configuration
//!
//! Configuration is layered the same way the process consumes it:
//! built-in defaults, then environment variables (a `.env` file is
//! honored), then an optional JSON config file, then CLI flags applied
//! by the binary. Later layers win.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Full configuration for one mailbox monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Mailbox to watch, usually `INBOX`.
    pub mailbox: String,
    /// Connect in the clear and upgrade via STARTTLS instead of
    /// implicit TLS.
    pub starttls: bool,
    /// Skip TLS certificate verification (self-signed test servers).
    pub insecure_skip_verify: bool,
    /// Periodic status poll while idling; zero disables the tick.
    pub poll_interval: Duration,
    /// How long to wait for in-flight consumer work before re-entering
    /// IDLE.
    pub drain_timeout: Duration,
    /// How long one IDLE command is held open before being renewed.
    pub idle_refresh: Duration,
    /// Default per-command timeout in the executor.
    pub command_timeout: Duration,
    /// TCP dial timeout.
    pub dial_timeout: Duration,
    /// Delay before reconnecting after a mid-session reset.
    pub reconnect_delay: Duration,
    pub webhook_url: String,
    /// Extra webhook headers as `Name=value;Other=value`.
    pub webhook_headers: String,
    /// Maximum body bytes carried in a payload before truncation.
    pub body_limit: usize,
    /// Maximum webhook delivery attempts beyond the first.
    pub retry_max: u32,
    /// Initial delivery retry backoff, doubled per attempt.
    pub retry_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
            starttls: false,
            insecure_skip_verify: false,
            poll_interval: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(3),
            idle_refresh: Duration::from_secs(25 * 60),
            command_timeout: Duration::from_secs(15),
            dial_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(2),
            webhook_url: String::new(),
            webhook_headers: String::new(),
            body_limit: 200 * 1024,
            retry_max: 5,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// File-level mirror of [`MonitorConfig`] where every field is
/// optional, so a config file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    mailbox: Option<String>,
    starttls: Option<bool>,
    insecure_skip_verify: Option<bool>,
    poll_interval_secs: Option<u64>,
    drain_timeout_secs: Option<u64>,
    idle_refresh_secs: Option<u64>,
    command_timeout_secs: Option<u64>,
    dial_timeout_secs: Option<u64>,
    webhook_url: Option<String>,
    webhook_headers: Option<String>,
    body_limit: Option<usize>,
    retry_max: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

impl MonitorConfig {
    /// Load configuration from the environment and, if given, a JSON
    /// config file (file values override environment values).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// numeric environment variable fails to parse.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut cfg = Self::default();
        cfg.apply_env()?;
        if let Some(path) = file {
            let data = std::fs::read_to_string(path)?;
            cfg.merge_file_str(&data)?;
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = env::var("IMAP_HOST") {
            self.host = v;
        }
        if let Ok(v) = env::var("IMAP_PORT") {
            self.port = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid IMAP_PORT: {e}")))?;
        }
        if let Ok(v) = env::var("IMAP_USERNAME") {
            self.username = v;
        }
        if let Ok(v) = env::var("IMAP_PASSWORD") {
            self.password = v;
        }
        if let Ok(v) = env::var("IMAP_MAILBOX") {
            self.mailbox = v;
        }
        if let Ok(v) = env::var("IMAP_STARTTLS") {
            self.starttls = parse_bool(&v);
        }
        if let Ok(v) = env::var("IMAP_INSECURE_SKIP_VERIFY") {
            self.insecure_skip_verify = parse_bool(&v);
        }
        if let Ok(v) = env::var("IMAP_POLL_INTERVAL_SECS") {
            self.poll_interval = parse_secs("IMAP_POLL_INTERVAL_SECS", &v)?;
        }
        if let Ok(v) = env::var("DRAIN_TIMEOUT_SECS") {
            self.drain_timeout = parse_secs("DRAIN_TIMEOUT_SECS", &v)?;
        }
        if let Ok(v) = env::var("WEBHOOK_URL") {
            self.webhook_url = v;
        }
        if let Ok(v) = env::var("WEBHOOK_HEADERS") {
            self.webhook_headers = v;
        }
        if let Ok(v) = env::var("BODY_LIMIT_BYTES") {
            self.body_limit = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid BODY_LIMIT_BYTES: {e}")))?;
        }
        if let Ok(v) = env::var("RETRY_MAX") {
            self.retry_max = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid RETRY_MAX: {e}")))?;
        }
        if let Ok(v) = env::var("RETRY_BACKOFF_MS") {
            let ms: u64 = v
                .parse()
                .map_err(|e| Error::Config(format!("invalid RETRY_BACKOFF_MS: {e}")))?;
            self.retry_backoff = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn merge_file_str(&mut self, data: &str) -> Result<()> {
        let fc: FileConfig = serde_json::from_str(data)
            .map_err(|e| Error::Config(format!("invalid config file: {e}")))?;
        if let Some(v) = fc.host {
            self.host = v;
        }
        if let Some(v) = fc.port {
            self.port = v;
        }
        if let Some(v) = fc.username {
            self.username = v;
        }
        if let Some(v) = fc.password {
            self.password = v;
        }
        if let Some(v) = fc.mailbox {
            self.mailbox = v;
        }
        if let Some(v) = fc.starttls {
            self.starttls = v;
        }
        if let Some(v) = fc.insecure_skip_verify {
            self.insecure_skip_verify = v;
        }
        if let Some(v) = fc.poll_interval_secs {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = fc.drain_timeout_secs {
            self.drain_timeout = Duration::from_secs(v);
        }
        if let Some(v) = fc.idle_refresh_secs {
            self.idle_refresh = Duration::from_secs(v);
        }
        if let Some(v) = fc.command_timeout_secs {
            self.command_timeout = Duration::from_secs(v);
        }
        if let Some(v) = fc.dial_timeout_secs {
            self.dial_timeout = Duration::from_secs(v);
        }
        if let Some(v) = fc.webhook_url {
            self.webhook_url = v;
        }
        if let Some(v) = fc.webhook_headers {
            self.webhook_headers = v;
        }
        if let Some(v) = fc.body_limit {
            self.body_limit = v;
        }
        if let Some(v) = fc.retry_max {
            self.retry_max = v;
        }
        if let Some(v) = fc.retry_backoff_ms {
            self.retry_backoff = Duration::from_millis(v);
        }
        Ok(())
    }

    /// Check that the required fields are present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("IMAP host not set".into()));
        }
        if self.username.is_empty() {
            return Err(Error::Config("IMAP username not set".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("IMAP password not set".into()));
        }
        if self.webhook_url.is_empty() {
            return Err(Error::Config("webhook URL not set".into()));
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "yes")
}

fn parse_secs(name: &str, v: &str) -> Result<Duration> {
    let secs: u64 = v
        .parse()
        .map_err(|e| Error::Config(format!("invalid {name}: {e}")))?;
    Ok(Duration::from_secs(secs))
}

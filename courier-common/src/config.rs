//! The configuration record for the mail subsystem.
//!
//! Configuration is deserialised from a TOML file, overlaid with environment
//! variables, and read-only from then on. Every section carries serde
//! defaults so a partial file (or none at all) still yields a usable record.

use std::{collections::HashMap, env, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which transport a [`crate::config::Config`] selects by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Smtp,
    Sendmail,
    Mailgun,
    Null,
}

impl DriverKind {
    /// The canonical configuration-file name of the driver.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Smtp => "smtp",
            Self::Sendmail => "sendmail",
            Self::Mailgun => "mailgun",
            Self::Null => "null",
        }
    }

    /// Local-only drivers never leave the machine, so outbound signing is
    /// pointless for them.
    #[must_use]
    pub const fn is_local_only(self) -> bool {
        matches!(self, Self::Null | Self::Sendmail)
    }
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smtp" => Ok(Self::Smtp),
            "sendmail" => Ok(Self::Sendmail),
            "mailgun" => Ok(Self::Mailgun),
            "null" => Ok(Self::Null),
            other => Err(ConfigError::Invalid {
                field: "driver",
                reason: format!("unknown driver '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `From` identity applied to outgoing messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FromConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
}

impl FromConfig {
    /// Renders the header value, `Name <address>` when a display name is
    /// configured, the bare address otherwise. Empty when unconfigured.
    #[must_use]
    pub fn header_value(&self) -> String {
        if self.address.is_empty() {
            String::new()
        } else if self.name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.name, self.address)
        }
    }
}

/// DKIM signing material, embedded in each driver section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DkimConfig {
    /// Raw base64 PEM body of the PKCS#8 private key, without guards.
    #[serde(default)]
    pub dkim_private_key: String,
    #[serde(default)]
    pub dkim_selector: String,
    #[serde(default)]
    pub dkim_domain: String,
}

impl DkimConfig {
    /// All three values must be present for signing to be possible.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.dkim_private_key.is_empty()
            && !self.dkim_selector.is_empty()
            && !self.dkim_domain.is_empty()
    }
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// STARTTLS upgrade after the first EHLO.
    #[default]
    Tls,
    /// TLS from the first byte.
    Ssl,
    /// Plaintext throughout.
    None,
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

const fn default_smtp_port() -> u16 {
    587
}

const fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub from: FromConfig,
    #[serde(flatten)]
    pub dkim: DkimConfig,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            encryption: Encryption::default(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
            from: FromConfig::default(),
            dkim: DkimConfig::default(),
        }
    }
}

/// Mailgun API region, which selects the endpoint host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
}

/// Open/click tracking toggles forwarded as `o:` fields.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tracking {
    #[serde(default)]
    pub clicks: bool,
    #[serde(default)]
    pub opens: bool,
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailgunConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub from: FromConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub tracking: Tracking,
    #[serde(default)]
    pub delivery_time: Option<String>,
    /// At most three tags are forwarded; extras are dropped with a warning.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub dkim: DkimConfig,
}

impl Default for MailgunConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            domain: String::new(),
            region: Region::default(),
            from: FromConfig::default(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            tracking: Tracking::default(),
            delivery_time: None,
            tags: Vec::new(),
            variables: HashMap::new(),
            dkim: DkimConfig::default(),
        }
    }
}

fn default_sendmail_path() -> String {
    "/usr/sbin/sendmail".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendmailConfig {
    #[serde(default = "default_sendmail_path")]
    pub path: String,
    #[serde(default)]
    pub from: FromConfig,
    #[serde(flatten)]
    pub dkim: DkimConfig,
}

impl Default for SendmailConfig {
    fn default() -> Self {
        Self {
            path: default_sendmail_path(),
            from: FromConfig::default(),
            dkim: DkimConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NullConfig {
    #[serde(default)]
    pub from: FromConfig,
}

/// Per-driver configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Drivers {
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub sendmail: SendmailConfig,
    #[serde(default)]
    pub mailgun: MailgunConfig,
    #[serde(default)]
    pub null: NullConfig,
}

impl Drivers {
    /// The `from` identity configured for the given driver.
    #[must_use]
    pub const fn from_for(&self, driver: DriverKind) -> &FromConfig {
        match driver {
            DriverKind::Smtp => &self.smtp.from,
            DriverKind::Sendmail => &self.sendmail.from,
            DriverKind::Mailgun => &self.mailgun.from,
            DriverKind::Null => &self.null.from,
        }
    }

    /// The DKIM material configured for the given driver. Local-only
    /// drivers carry the fields too; whether they are used is decided by
    /// the signing applicability rule, not here.
    #[must_use]
    pub fn dkim_for(&self, driver: DriverKind) -> DkimConfig {
        match driver {
            DriverKind::Smtp => self.smtp.dkim.clone(),
            DriverKind::Sendmail => self.sendmail.dkim.clone(),
            DriverKind::Mailgun => self.mailgun.dkim.clone(),
            DriverKind::Null => DkimConfig::default(),
        }
    }
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_redis_port() -> u16 {
    6379
}

/// Connection parameters for the queue's key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Renders the connection URL. The password, when present, is embedded
    /// as URL userinfo.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{password}@{}:{}/{}", self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

const fn default_worker_sleep_secs() -> u64 {
    3
}

const fn default_worker_max_tries() -> u32 {
    3
}

const fn default_worker_memory_mb() -> u64 {
    128
}

const fn default_worker_timeout_secs() -> u64 {
    60
}

/// Worker loop tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Idle poll interval in seconds.
    #[serde(default = "default_worker_sleep_secs")]
    pub sleep: u64,
    /// Completed failed attempts after which a job is sidelined.
    #[serde(default = "default_worker_max_tries")]
    pub max_tries: u32,
    /// Resident-memory ceiling; the loop exits gracefully beyond it.
    #[serde(default = "default_worker_memory_mb")]
    pub memory_mb: u64,
    /// Per-job deadline in seconds.
    #[serde(default = "default_worker_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sleep: default_worker_sleep_secs(),
            max_tries: default_worker_max_tries(),
            memory_mb: default_worker_memory_mb(),
            timeout_secs: default_worker_timeout_secs(),
        }
    }
}

fn default_queue_name() -> String {
    "default".to_string()
}

fn default_key_prefix() -> String {
    "courier:queue:".to_string()
}

fn default_failed_jobs_key() -> String {
    "failed".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub connection: RedisConfig,
    #[serde(default = "default_queue_name")]
    pub default_queue: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_failed_jobs_key")]
    pub failed_jobs_key: String,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connection: RedisConfig::default(),
            default_queue: default_queue_name(),
            key_prefix: default_key_prefix(),
            failed_jobs_key: default_failed_jobs_key(),
            worker: WorkerConfig::default(),
        }
    }
}

fn default_rate_limiter_key() -> String {
    "global".to_string()
}

const fn default_rate_limit() -> usize {
    60
}

const fn default_rate_window_secs() -> u64 {
    60
}

fn default_rate_storage_path() -> String {
    "/tmp/courier/ratelimit".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_rate_limiter_key")]
    pub key: String,
    #[serde(default = "default_rate_limit")]
    pub limit: usize,
    #[serde(default = "default_rate_window_secs")]
    pub seconds: u64,
    #[serde(default = "default_rate_storage_path")]
    pub storage_path: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            key: default_rate_limiter_key(),
            limit: default_rate_limit(),
            seconds: default_rate_window_secs(),
            storage_path: default_rate_storage_path(),
        }
    }
}

/// The complete configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverKind,
    #[serde(default)]
    pub drivers: Drivers,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
}

impl Config {
    /// Parses a TOML document into a configuration record.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    /// Reads and parses the given file, then applies the environment
    /// overlay. A missing file yields the defaults (still overlaid).
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed,
    /// or when an environment variable holds an unparseable value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_toml(&std::fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Applies the recognised environment variables on top of the record.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable holds a value that
    /// does not parse (a port, a count, a driver name).
    #[allow(clippy::too_many_lines)]
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(driver) = var("MAIL_DRIVER") {
            self.driver = driver.parse()?;
        }
        if let Some(host) = var("MAIL_HOST") {
            self.drivers.smtp.host = host;
        }
        if let Some(port) = var("MAIL_PORT") {
            self.drivers.smtp.port = parse(&port, "MAIL_PORT")?;
        }
        if let Some(encryption) = var("MAIL_ENCRYPTION") {
            self.drivers.smtp.encryption = match encryption.as_str() {
                "tls" => Encryption::Tls,
                "ssl" => Encryption::Ssl,
                "none" | "" => Encryption::None,
                other => {
                    return Err(ConfigError::Invalid {
                        field: "MAIL_ENCRYPTION",
                        reason: format!("unknown encryption '{other}'"),
                    });
                }
            };
        }
        if let Some(username) = var("MAIL_USERNAME") {
            self.drivers.smtp.username = username;
        }
        if let Some(password) = var("MAIL_PASSWORD") {
            self.drivers.smtp.password = password;
        }
        if let Some(timeout) = var("MAIL_TIMEOUT") {
            self.drivers.smtp.timeout_secs = parse(&timeout, "MAIL_TIMEOUT")?;
        }
        if let Some(address) = var("MAIL_FROM_ADDRESS") {
            self.drivers.smtp.from.address.clone_from(&address);
            self.drivers.sendmail.from.address.clone_from(&address);
            self.drivers.mailgun.from.address.clone_from(&address);
            self.drivers.null.from.address = address;
        }
        if let Some(name) = var("MAIL_FROM_NAME") {
            self.drivers.smtp.from.name.clone_from(&name);
            self.drivers.sendmail.from.name.clone_from(&name);
            self.drivers.mailgun.from.name.clone_from(&name);
            self.drivers.null.from.name = name;
        }
        if let Some(key) = var("MAIL_DKIM_PRIVATE_KEY") {
            self.drivers.smtp.dkim.dkim_private_key.clone_from(&key);
            self.drivers.sendmail.dkim.dkim_private_key.clone_from(&key);
            self.drivers.mailgun.dkim.dkim_private_key = key;
        }
        if let Some(selector) = var("MAIL_DKIM_SELECTOR") {
            self.drivers.smtp.dkim.dkim_selector.clone_from(&selector);
            self.drivers.sendmail.dkim.dkim_selector.clone_from(&selector);
            self.drivers.mailgun.dkim.dkim_selector = selector;
        }
        if let Some(domain) = var("MAIL_DKIM_DOMAIN") {
            self.drivers.smtp.dkim.dkim_domain.clone_from(&domain);
            self.drivers.sendmail.dkim.dkim_domain.clone_from(&domain);
            self.drivers.mailgun.dkim.dkim_domain = domain;
        }
        if let Some(api_key) = var("MAILGUN_API_KEY") {
            self.drivers.mailgun.api_key = api_key;
        }
        if let Some(domain) = var("MAILGUN_DOMAIN") {
            self.drivers.mailgun.domain = domain;
        }
        if let Some(region) = var("MAILGUN_REGION") {
            self.drivers.mailgun.region = match region.as_str() {
                "us" => Region::Us,
                "eu" => Region::Eu,
                other => {
                    return Err(ConfigError::Invalid {
                        field: "MAILGUN_REGION",
                        reason: format!("unknown region '{other}'"),
                    });
                }
            };
        }
        if let Some(host) = var("REDIS_HOST") {
            self.queue.connection.host = host;
        }
        if let Some(port) = var("REDIS_PORT") {
            self.queue.connection.port = parse(&port, "REDIS_PORT")?;
        }
        if let Some(password) = var("REDIS_PASSWORD") {
            self.queue.connection.password = Some(password);
        }
        if let Some(db) = var("REDIS_DB") {
            self.queue.connection.db = parse(&db, "REDIS_DB")?;
        }
        if let Some(queue) = var("QUEUE_DEFAULT") {
            self.queue.default_queue = queue;
        }
        if let Some(prefix) = var("QUEUE_PREFIX") {
            self.queue.key_prefix = prefix;
        }
        if let Some(sleep) = var("QUEUE_SLEEP") {
            self.queue.worker.sleep = parse(&sleep, "QUEUE_SLEEP")?;
        }
        if let Some(tries) = var("QUEUE_MAX_TRIES") {
            self.queue.worker.max_tries = parse(&tries, "QUEUE_MAX_TRIES")?;
        }
        if let Some(memory) = var("QUEUE_MEMORY") {
            self.queue.worker.memory_mb = parse(&memory, "QUEUE_MEMORY")?;
        }
        if let Some(timeout) = var("QUEUE_TIMEOUT") {
            self.queue.worker.timeout_secs = parse(&timeout, "QUEUE_TIMEOUT")?;
        }
        if let Some(key) = var("RATE_LIMITER_KEY") {
            self.rate_limiter.key = key;
        }
        if let Some(limit) = var("RATE_LIMITER_LIMIT") {
            self.rate_limiter.limit = parse(&limit, "RATE_LIMITER_LIMIT")?;
        }
        if let Some(seconds) = var("RATE_LIMITER_SECONDS") {
            self.rate_limiter.seconds = parse(&seconds, "RATE_LIMITER_SECONDS")?;
        }
        if let Some(path) = var("RATE_LIMITER_STORAGE_PATH") {
            self.rate_limiter.storage_path = path;
        }
        Ok(())
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn parse<T: FromStr>(value: &str, field: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("unparseable value '{value}'"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // Environment mutation is process-global; tests touching it take this
    // lock so the parallel test runner cannot interleave them.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.driver, DriverKind::Smtp);
        assert_eq!(config.drivers.smtp.port, 587);
        assert_eq!(config.queue.worker.max_tries, 3);
        assert_eq!(config.rate_limiter.limit, 60);
        assert_eq!(config.queue.key_prefix, "courier:queue:");
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::from_toml(
            r#"
            driver = "mailgun"

            [drivers.mailgun]
            api_key = "key-abc"
            domain = "mg.example.com"
            region = "eu"
            tags = ["news"]

            [drivers.smtp]
            host = "smtp.example.com"
            dkim_selector = "s1"

            [queue]
            default_queue = "mail"

            [queue.worker]
            max_tries = 5
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.driver, DriverKind::Mailgun);
        assert_eq!(config.drivers.mailgun.api_key, "key-abc");
        assert_eq!(config.drivers.mailgun.region, Region::Eu);
        assert_eq!(config.drivers.smtp.host, "smtp.example.com");
        assert_eq!(config.drivers.smtp.dkim.dkim_selector, "s1");
        assert_eq!(config.queue.default_queue, "mail");
        assert_eq!(config.queue.worker.max_tries, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.drivers.sendmail.path, "/usr/sbin/sendmail");
    }

    #[test]
    fn env_overlay_wins() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var("MAIL_DRIVER", "null");
            env::set_var("MAIL_PORT", "2525");
            env::set_var("QUEUE_MAX_TRIES", "7");
        }
        let mut config = Config::default();
        config.apply_env().expect("overlay applies");
        unsafe {
            env::remove_var("MAIL_DRIVER");
            env::remove_var("MAIL_PORT");
            env::remove_var("QUEUE_MAX_TRIES");
        }

        assert_eq!(config.driver, DriverKind::Null);
        assert_eq!(config.drivers.smtp.port, 2525);
        assert_eq!(config.queue.worker.max_tries, 7);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        unsafe {
            env::set_var("RATE_LIMITER_LIMIT", "plenty");
        }
        let result = Config::default().apply_env();
        unsafe {
            env::remove_var("RATE_LIMITER_LIMIT");
        }
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "RATE_LIMITER_LIMIT",
                ..
            })
        ));
    }

    #[test]
    fn redis_url_embeds_password() {
        let mut connection = RedisConfig::default();
        assert_eq!(connection.url(), "redis://127.0.0.1:6379/0");

        connection.password = Some("hunter2".to_string());
        connection.db = 3;
        assert_eq!(connection.url(), "redis://:hunter2@127.0.0.1:6379/3");
    }

    #[test]
    fn from_header_value_forms() {
        let mut from = FromConfig::default();
        assert_eq!(from.header_value(), "");

        from.address = "noreply@example.com".to_string();
        assert_eq!(from.header_value(), "noreply@example.com");

        from.name = "Example".to_string();
        assert_eq!(from.header_value(), "Example <noreply@example.com>");
    }

    #[test]
    fn local_only_drivers() {
        assert!(DriverKind::Null.is_local_only());
        assert!(DriverKind::Sendmail.is_local_only());
        assert!(!DriverKind::Smtp.is_local_only());
        assert!(!DriverKind::Mailgun.is_local_only());
    }
}

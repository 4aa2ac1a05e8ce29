//! Delivery settings, engine configuration, sender identity and admin groups.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `DELIVERY_RATE_LIMIT_PER_HOUR` | Sends allowed per rolling hour (default: 100, must be > 0) |
//! | `DELIVERY_RETRY_ATTEMPTS` | Retries after a transient failure (default: 3) |
//! | `DELIVERY_RETRY_DELAY_SECONDS` | Fixed delay between attempts (default: 300) |
//! | `DELIVERY_BOUNCE_HANDLING` | Process bounce callbacks (default: true) |
//! | `DELIVERY_TRACK_OPENS` | Record open callbacks (default: true) |
//! | `DELIVERY_TRACK_CLICKS` | Record click callbacks (default: true) |
//! | `EMAIL_FROM` | Sender email |
//! | `EMAIL_FROM_NAME` | Sender display name |
//! | `EMAIL_REPLY_TO` | Reply-to address |
//! | `ADMIN_EMAILS` | Comma-separated default admin distribution list |

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::ConfigError;

/// Process-wide delivery settings.
///
/// Loaded at startup and replaced wholesale on reload; a dispatch holds one
/// snapshot for its whole attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_hour: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_true")]
    pub bounce_handling_enabled: bool,
    #[serde(default = "default_true")]
    pub track_opens: bool,
    #[serde(default = "default_true")]
    pub track_clicks: bool,
}

const fn default_rate_limit() -> u32 {
    100
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_delay() -> u64 {
    300
}

const fn default_true() -> bool {
    true
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            rate_limit_per_hour: default_rate_limit(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay(),
            bounce_handling_enabled: true,
            track_opens: true,
            track_clicks: true,
        }
    }
}

impl DeliverySettings {
    /// Load from `DELIVERY_*` environment variables, defaulting absent keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary key lookup.
    ///
    /// ```
    /// use courier::DeliverySettings;
    ///
    /// let settings = DeliverySettings::from_lookup(|key| match key {
    ///     "DELIVERY_RETRY_ATTEMPTS" => Some("2".into()),
    ///     "DELIVERY_TRACK_OPENS" => Some("false".into()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(settings.retry_attempts, 2);
    /// assert!(!settings.track_opens);
    /// assert_eq!(settings.rate_limit_per_hour, 100);
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(v) = lookup("DELIVERY_RATE_LIMIT_PER_HOUR") {
            settings.rate_limit_per_hour = parse_number("DELIVERY_RATE_LIMIT_PER_HOUR", &v)?;
        }
        if let Some(v) = lookup("DELIVERY_RETRY_ATTEMPTS") {
            settings.retry_attempts = parse_number("DELIVERY_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("DELIVERY_RETRY_DELAY_SECONDS") {
            settings.retry_delay_seconds = parse_number("DELIVERY_RETRY_DELAY_SECONDS", &v)?;
        }
        if let Some(v) = lookup("DELIVERY_BOUNCE_HANDLING") {
            settings.bounce_handling_enabled = parse_bool("DELIVERY_BOUNCE_HANDLING", &v)?;
        }
        if let Some(v) = lookup("DELIVERY_TRACK_OPENS") {
            settings.track_opens = parse_bool("DELIVERY_TRACK_OPENS", &v)?;
        }
        if let Some(v) = lookup("DELIVERY_TRACK_CLICKS") {
            settings.track_clicks = parse_bool("DELIVERY_TRACK_CLICKS", &v)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_per_hour == 0 {
            return Err(ConfigError::invalid(
                "rate_limit_per_hour",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{value}' is not a non-negative integer")))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{value}' is not a boolean"))),
    }
}

/// Shared, hot-reloadable view of [`DeliverySettings`].
#[derive(Debug)]
pub struct SettingsHandle {
    current: RwLock<Arc<DeliverySettings>>,
}

impl SettingsHandle {
    pub fn new(settings: DeliverySettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// The settings in force right now. Later reloads do not affect it.
    pub fn snapshot(&self) -> Arc<DeliverySettings> {
        Arc::clone(&self.current.read())
    }

    /// Validate and swap in new settings, returning the previous ones.
    pub fn reload(&self, settings: DeliverySettings) -> Result<Arc<DeliverySettings>, ConfigError> {
        settings.validate()?;
        let rate = settings.rate_limit_per_hour;
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(settings));
        tracing::info!(
            previous_rate_limit = previous.rate_limit_per_hour,
            rate_limit_per_hour = rate,
            "Delivery settings reloaded"
        );
        Ok(previous)
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(DeliverySettings::default())
    }
}

/// Who outbound messages come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Address>,
}

impl Sender {
    pub fn new(from: impl Into<Address>) -> Self {
        Self {
            from: from.into(),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, address: impl Into<Address>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Load from `EMAIL_FROM`, `EMAIL_FROM_NAME` and `EMAIL_REPLY_TO`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let email = lookup("EMAIL_FROM").ok_or(ConfigError::Missing("EMAIL_FROM"))?;
        let name = lookup("EMAIL_FROM_NAME").unwrap_or_default();
        let from = Address::parse_with_name(&name, &email)
            .map_err(|e| ConfigError::invalid("EMAIL_FROM", e.to_string()))?;

        let reply_to = match lookup("EMAIL_REPLY_TO") {
            Some(v) if !v.trim().is_empty() => Some(
                Address::parse(&v).map_err(|e| ConfigError::invalid("EMAIL_REPLY_TO", e.to_string()))?,
            ),
            _ => None,
        };

        Ok(Self { from, reply_to })
    }
}

/// Admin distribution lists.
///
/// `default` receives every `admin_group` message unless the event's
/// `form_name` has its own list.
///
/// ```
/// use courier::{Address, AdminGroups};
///
/// let admins = AdminGroups::new(vec![Address::new("info@example.com")])
///     .with_form("careers", vec![Address::new("careers@example.com")]);
///
/// assert_eq!(admins.for_form(Some("careers"))[0].email, "careers@example.com");
/// assert_eq!(admins.for_form(Some("contact"))[0].email, "info@example.com");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminGroups {
    #[serde(default)]
    pub default: Vec<Address>,
    #[serde(default)]
    pub per_form: BTreeMap<String, Vec<Address>>,
}

impl AdminGroups {
    pub fn new(default: Vec<Address>) -> Self {
        Self {
            default,
            per_form: BTreeMap::new(),
        }
    }

    /// Route `form_name` to its own list.
    pub fn with_form(mut self, form_name: impl Into<String>, addresses: Vec<Address>) -> Self {
        self.per_form.insert(form_name.into(), addresses);
        self
    }

    /// The list for a form, or the default list.
    pub fn for_form(&self, form_name: Option<&str>) -> &[Address] {
        form_name
            .and_then(|name| self.per_form.get(name))
            .unwrap_or(&self.default)
    }

    /// Check every configured address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default
            .iter()
            .chain(self.per_form.values().flatten())
            .try_for_each(|a| {
                a.validate()
                    .map_err(|e| ConfigError::invalid("admin_groups", e.to_string()))
            })
    }

    /// Load the default list from comma-separated `ADMIN_EMAILS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Address::parse_list(&lookup("ADMIN_EMAILS").unwrap_or_default())
            .map_err(|e| ConfigError::invalid("ADMIN_EMAILS", e.to_string()))?;
        Ok(Self::new(default))
    }
}

/// Engine wiring options that are not hot-reloadable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker tasks spawned by [`Engine::spawn_workers`](crate::Engine::spawn_workers).
    pub worker_count: usize,
    /// How often idle workers poll for due jobs.
    pub tick_interval: Duration,
    /// How long a claim stays valid before the job can be reclaimed.
    pub visibility_timeout: Duration,
    /// Upper bound on a single transport send.
    pub send_timeout: Duration,
    /// Fail jobs whose declared template variables are missing instead of
    /// sending with the placeholder left in.
    pub strict_variables: bool,
    pub sender: Option<Sender>,
    pub admin_groups: AdminGroups,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            tick_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(300),
            send_timeout: Duration::from_secs(30),
            strict_variables: false,
            sender: None,
            admin_groups: AdminGroups::default(),
        }
    }
}

impl EngineConfig {
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn strict_variables(mut self, strict: bool) -> Self {
        self.strict_variables = strict;
        self
    }

    pub fn sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn admin_groups(mut self, groups: AdminGroups) -> Self {
        self.admin_groups = groups;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("worker_count", "must be at least 1"));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::invalid("send_timeout", "must be non-zero"));
        }
        if self.visibility_timeout <= self.send_timeout {
            return Err(ConfigError::invalid(
                "visibility_timeout",
                "must exceed send_timeout",
            ));
        }
        if let Some(sender) = &self.sender {
            sender
                .from
                .validate()
                .map_err(|e| ConfigError::invalid("sender", e.to_string()))?;
        }
        self.admin_groups.validate()
    }
}

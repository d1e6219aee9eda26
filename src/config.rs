//! Configuration types.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::transport::UserId;

/// Default trigger token that packages a channel's buffer.
pub const DEFAULT_TRIGGER: &str = "done";

/// Default name of the channel accepted packages are archived to.
pub const DEFAULT_ARCHIVE_CHANNEL: &str = "backlog";

/// Default bound on one Discord API request, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Relay configuration, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Discord bot credential.
    pub bot_token: SecretString,
    /// Monitored channel name (lowercase) → reviewer user id.
    pub reviewers: HashMap<String, UserId>,
    /// Lowercase names of the channels whose messages are buffered.
    pub monitored_channels: Vec<String>,
    /// Token that drains and packages a channel's buffer.
    pub trigger: String,
    /// Channel accepted packages are copied to.
    pub archive_channel: String,
    /// Minimum time between two reminders for the same package.
    pub notification_interval: Duration,
    /// How often the pending registry is scanned.
    pub scan_interval: Duration,
    /// Upper bound on a single Discord API request.
    pub request_timeout: Duration,
}

impl RelayConfig {
    /// Build a config with defaults for everything but the credential.
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: SecretString::from(bot_token.into()),
            reviewers: HashMap::new(),
            monitored_channels: Vec::new(),
            trigger: DEFAULT_TRIGGER.to_string(),
            archive_channel: DEFAULT_ARCHIVE_CHANNEL.to_string(),
            notification_interval: Duration::from_secs(60),
            scan_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Map a channel to the user who gets reminders for its packages.
    /// The channel is also added to the monitored set.
    pub fn with_reviewer(mut self, channel: &str, user_id: UserId) -> Self {
        let channel = channel.trim().to_lowercase();
        if !self.monitored_channels.contains(&channel) {
            self.monitored_channels.push(channel.clone());
        }
        self.reviewers.insert(channel, user_id);
        self
    }

    /// Monitor a channel without assigning a reviewer.
    pub fn with_monitored_channel(mut self, channel: &str) -> Self {
        let channel = channel.trim().to_lowercase();
        if !self.monitored_channels.contains(&channel) {
            self.monitored_channels.push(channel);
        }
        self
    }

    pub fn with_intervals(mut self, notification: Duration, scan: Duration) -> Self {
        self.notification_interval = notification;
        self.scan_interval = scan;
        self
    }

    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("DISCORD_BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_BOT_TOKEN".into()))?;

        let reviewers = parse_reviewers(&lookup("RELAY_REVIEWERS").unwrap_or_default())?;

        let mut monitored_channels: Vec<String> = lookup("RELAY_CHANNELS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if monitored_channels.is_empty() {
            monitored_channels = reviewers.keys().cloned().collect();
            monitored_channels.sort();
        }

        let trigger = lookup("RELAY_TRIGGER")
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| DEFAULT_TRIGGER.to_string());
        if trigger.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_TRIGGER".into(),
                message: "trigger token must not be empty".into(),
            });
        }

        let archive_channel = lookup("RELAY_ARCHIVE_CHANNEL")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_ARCHIVE_CHANNEL.to_string());

        let notification_interval = parse_secs(&lookup, "RELAY_NOTIFY_INTERVAL_SECS", 60)?;
        let scan_interval = parse_secs(&lookup, "RELAY_SCAN_INTERVAL_SECS", 10)?;
        if scan_interval > notification_interval {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_SCAN_INTERVAL_SECS".into(),
                message: format!(
                    "scan period ({}s) must not exceed the notification interval ({}s)",
                    scan_interval.as_secs(),
                    notification_interval.as_secs()
                ),
            });
        }

        let request_timeout = parse_secs(
            &lookup,
            "RELAY_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            reviewers,
            monitored_channels,
            trigger,
            archive_channel,
            notification_interval,
            scan_interval,
            request_timeout,
        })
    }
}

/// Parse `name=id` pairs separated by commas.
fn parse_reviewers(raw: &str) -> Result<HashMap<String, UserId>, ConfigError> {
    let mut reviewers = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (channel, id) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
            key: "RELAY_REVIEWERS".into(),
            message: format!("expected channel=user_id, got '{entry}'"),
        })?;
        let channel = channel.trim().to_lowercase();
        if channel.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_REVIEWERS".into(),
                message: format!("empty channel name in '{entry}'"),
            });
        }
        let id: UserId = id.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: "RELAY_REVIEWERS".into(),
            message: format!("'{}' is not a user id", id.trim()),
        })?;
        reviewers.insert(channel, id);
    }
    Ok(reviewers)
}

fn parse_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("'{raw}' is not a number of seconds"),
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_token() {
        let config = RelayConfig::from_lookup(lookup_from(&[("DISCORD_BOT_TOKEN", "t")])).unwrap();
        assert_eq!(config.trigger, "done");
        assert_eq!(config.archive_channel, "backlog");
        assert_eq!(config.notification_interval, Duration::from_secs(60));
        assert_eq!(config.scan_interval, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.reviewers.is_empty());
        assert!(config.monitored_channels.is_empty());
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = RelayConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "DISCORD_BOT_TOKEN"));
    }

    #[test]
    fn reviewers_define_monitored_channels() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_REVIEWERS", "Rita=111, marcelo=222"),
        ]))
        .unwrap();
        assert_eq!(config.monitored_channels, vec!["marcelo", "rita"]);
        assert_eq!(config.reviewers.get("rita"), Some(&111));
        assert_eq!(config.reviewers.get("marcelo"), Some(&222));
        assert_eq!(config.reviewers.get("general"), None);
    }

    #[test]
    fn explicit_channels_override_reviewer_keys() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_REVIEWERS", "rita=111"),
            ("RELAY_CHANNELS", "rita, intake"),
        ]))
        .unwrap();
        assert_eq!(config.monitored_channels, vec!["rita", "intake"]);
        assert_eq!(config.reviewers.get("intake"), None);
    }

    #[test]
    fn bad_reviewer_id_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_REVIEWERS", "rita=abc"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RELAY_REVIEWERS"));
    }

    #[test]
    fn reviewer_entry_without_separator_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_REVIEWERS", "rita"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn scan_period_longer_than_interval_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_NOTIFY_INTERVAL_SECS", "30"),
            ("RELAY_SCAN_INTERVAL_SECS", "45"),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RELAY_SCAN_INTERVAL_SECS")
        );
    }

    #[test]
    fn zero_interval_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_SCAN_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn blank_trigger_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_TRIGGER", "   "),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "RELAY_TRIGGER"));
    }

    #[test]
    fn builder_adds_reviewer_channels() {
        let config = RelayConfig::new("t")
            .with_reviewer("Marcelo", 7)
            .with_monitored_channel("intake");
        assert_eq!(config.monitored_channels, vec!["marcelo", "intake"]);
        assert_eq!(config.reviewers.get("marcelo"), Some(&7));
    }

    #[test]
    fn request_timeout_is_configurable() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("DISCORD_BOT_TOKEN", "t"),
            ("RELAY_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}

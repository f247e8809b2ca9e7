use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::RetryPolicy;
use crate::notify::DeliveryPolicy;

pub const DEFAULT_STATE_FILE: &str = "aro_state.json";
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SMS_MAX_LEN: usize = 320;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("Incomplete SMS configuration, missing: {}", .0.join(", "))]
    IncompleteSms(Vec<&'static str>),
}

/// Where to look and how hard to try. Enough for a read-only `check`.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub listings_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub address: String,
    pub password: String,
    pub recipient: String,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
    pub max_len: usize,
}

/// What to watch and where to remember it. Needs no credentials, so a dry
/// run can be configured from this alone.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub fetch: FetchConfig,
    pub state_path: PathBuf,
    pub realert_on_content_change: bool,
}

/// Everything a monitoring pass needs, constructed once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub watch: WatchConfig,
    pub delivery: DeliveryPolicy,
    pub email: EmailConfig,
    /// `None` when no SMS credentials were supplied at all.
    pub sms: Option<SmsConfig>,
}

impl FetchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let mut retry = RetryPolicy::default();
        if let Some(attempts) = vars.parsed::<u32>("ARO_FETCH_ATTEMPTS")? {
            retry.max_attempts = attempts;
        }
        if let Some(secs) = vars.parsed::<u64>("ARO_RETRY_BASE_SECS")? {
            retry.base_delay = Duration::from_secs(secs);
        }

        let config = Self {
            listings_url: vars
                .get("ARO_LISTINGS_URL")
                .unwrap_or_else(|| crate::DEFAULT_LISTINGS_URL.to_string()),
            timeout: vars
                .parsed::<u64>("ARO_FETCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_FETCH_TIMEOUT),
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.listings_url.starts_with("http://") || self.listings_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid {
                key: "ARO_LISTINGS_URL",
                value: self.listings_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "ARO_FETCH_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "ARO_FETCH_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// `ARO_STATE_FILE`, or the default when it is unset or blank.
pub fn state_path_from_env() -> PathBuf {
    state_path_from_lookup(|key| std::env::var(key).ok())
}

pub fn state_path_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    Vars(&lookup)
        .get("ARO_STATE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

impl WatchConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            fetch: FetchConfig::from_lookup(&lookup)?,
            state_path: state_path_from_lookup(&lookup),
            realert_on_content_change: Vars(&lookup)
                .parsed_bool("ARO_CONTENT_REALERT")?
                .unwrap_or(true),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                key: "ARO_STATE_FILE",
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        self.fetch.validate()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let watch = WatchConfig::from_lookup(&lookup)?;
        let vars = Vars(&lookup);

        let email = EmailConfig {
            smtp_host: vars
                .get("SMTP_HOST")
                .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port: vars.parsed("SMTP_PORT")?.unwrap_or(DEFAULT_SMTP_PORT),
            address: vars.required("EMAIL_ADDRESS")?,
            password: vars.required("EMAIL_PASSWORD")?,
            recipient: vars.required("NOTIFICATION_EMAIL")?,
        };

        let sms_keys = [
            "TWILIO_ACCOUNT_SID",
            "TWILIO_AUTH_TOKEN",
            "TWILIO_PHONE_NUMBER",
            "NOTIFICATION_PHONE",
        ];
        let sms_values: Vec<Option<String>> = sms_keys.iter().map(|k| vars.get(k)).collect();
        let sms = if sms_values.iter().all(Option::is_none) {
            None
        } else if let [Some(sid), Some(token), Some(from), Some(to)] = sms_values.as_slice() {
            Some(SmsConfig {
                account_sid: sid.clone(),
                auth_token: token.clone(),
                from_number: from.clone(),
                to_number: to.clone(),
                max_len: vars.parsed("SMS_MAX_LEN")?.unwrap_or(DEFAULT_SMS_MAX_LEN),
            })
        } else {
            let missing = sms_keys
                .iter()
                .zip(&sms_values)
                .filter(|(_, v)| v.is_none())
                .map(|(k, _)| *k)
                .collect();
            return Err(ConfigError::IncompleteSms(missing));
        };

        let config = Self {
            watch,
            delivery: vars.parsed("ARO_DELIVERY")?.unwrap_or_default(),
            email,
            sms,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()?;
        if self.email.smtp_port == 0 {
            return Err(ConfigError::Invalid {
                key: "SMTP_PORT",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        for (key, value) in [
            ("EMAIL_ADDRESS", &self.email.address),
            ("NOTIFICATION_EMAIL", &self.email.recipient),
        ] {
            if !value.contains('@') {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: "not an email address".to_string(),
                });
            }
        }
        if let Some(sms) = &self.sms
            && sms.max_len < 40
        {
            return Err(ConfigError::Invalid {
                key: "SMS_MAX_LEN",
                value: sms.max_len.to_string(),
                reason: "must allow at least 40 characters".to_string(),
            });
        }
        Ok(())
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parsed_bool(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|value| match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value,
                    reason: "expected true or false".to_string(),
                }),
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const EMAIL: [(&str, &str); 3] = [
        ("EMAIL_ADDRESS", "watcher@example.com"),
        ("EMAIL_PASSWORD", "app-password"),
        ("NOTIFICATION_EMAIL", "me@example.com"),
    ];

    #[test]
    fn test_defaults_with_email_only() {
        let config = Config::from_lookup(lookup(&EMAIL)).expect("valid config");

        assert_eq!(config.watch.fetch.listings_url, crate::DEFAULT_LISTINGS_URL);
        assert_eq!(config.watch.fetch.timeout, Duration::from_secs(10));
        assert_eq!(config.watch.fetch.retry.max_attempts, 3);
        assert_eq!(config.watch.fetch.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.watch.state_path, PathBuf::from(DEFAULT_STATE_FILE));
        assert!(config.watch.realert_on_content_change);
        assert_eq!(config.delivery, DeliveryPolicy::All);
        assert_eq!(config.email.smtp_host, "smtp.gmail.com");
        assert_eq!(config.email.smtp_port, 587);
        assert!(config.sms.is_none());
    }

    #[test]
    fn test_missing_email_is_rejected() {
        let err = Config::from_lookup(lookup(&EMAIL[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("NOTIFICATION_EMAIL")));
    }

    #[test]
    fn test_full_sms_config() {
        let mut pairs = EMAIL.to_vec();
        pairs.extend([
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("TWILIO_PHONE_NUMBER", "+15550001111"),
            ("NOTIFICATION_PHONE", "+15552223333"),
            ("SMS_MAX_LEN", "160"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).expect("valid config");
        let sms = config.sms.expect("sms enabled");
        assert_eq!(sms.account_sid, "AC123");
        assert_eq!(sms.max_len, 160);
    }

    #[test]
    fn test_partial_sms_config_names_missing_keys() {
        let mut pairs = EMAIL.to_vec();
        pairs.extend([("TWILIO_ACCOUNT_SID", "AC123"), ("TWILIO_AUTH_TOKEN", "secret")]);
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        match err {
            ConfigError::IncompleteSms(missing) => {
                assert_eq!(missing, vec!["TWILIO_PHONE_NUMBER", "NOTIFICATION_PHONE"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let mut pairs = EMAIL.to_vec();
        pairs.extend([
            ("ARO_FETCH_TIMEOUT_SECS", "5"),
            ("ARO_FETCH_ATTEMPTS", "4"),
            ("ARO_CONTENT_REALERT", "off"),
            ("ARO_DELIVERY", "fallback"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).expect("valid config");
        assert_eq!(config.watch.fetch.timeout, Duration::from_secs(5));
        assert_eq!(config.watch.fetch.retry.max_attempts, 4);
        assert!(!config.watch.realert_on_content_change);
        assert_eq!(config.delivery, DeliveryPolicy::Fallback);

        let mut bad = EMAIL.to_vec();
        bad.push(("ARO_FETCH_TIMEOUT_SECS", "soon"));
        assert!(matches!(
            Config::from_lookup(lookup(&bad)),
            Err(ConfigError::Invalid {
                key: "ARO_FETCH_TIMEOUT_SECS",
                ..
            })
        ));

        let mut zero = EMAIL.to_vec();
        zero.push(("ARO_FETCH_ATTEMPTS", "0"));
        assert!(Config::from_lookup(lookup(&zero)).is_err());
    }

    #[test]
    fn test_watch_config_needs_no_credentials() {
        let watch = WatchConfig::from_lookup(lookup(&[
            ("ARO_STATE_FILE", "/var/lib/aro/state.json"),
            ("ARO_CONTENT_REALERT", "false"),
        ]))
        .expect("no credentials required");

        assert_eq!(watch.state_path, PathBuf::from("/var/lib/aro/state.json"));
        assert!(!watch.realert_on_content_change);
        assert_eq!(watch.fetch.listings_url, crate::DEFAULT_LISTINGS_URL);
    }

    #[test]
    fn test_blank_state_file_falls_back_to_default() {
        assert_eq!(
            state_path_from_lookup(lookup(&[("ARO_STATE_FILE", "   ")])),
            PathBuf::from(DEFAULT_STATE_FILE)
        );
        assert_eq!(
            state_path_from_lookup(lookup(&[("ARO_STATE_FILE", " data/state.json ")])),
            PathBuf::from("data/state.json")
        );
    }

    #[test]
    fn test_fetch_config_needs_no_credentials() {
        let fetch = FetchConfig::from_lookup(lookup(&[("ARO_LISTINGS_URL", "ftp://nope")]));
        assert!(fetch.is_err());

        let fetch = FetchConfig::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(fetch.listings_url, crate::DEFAULT_LISTINGS_URL);
    }
}

pub mod email;
pub mod message;
pub mod sms;

use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;

use crate::config::Config;

pub use email::EmailNotifier;
pub use message::Alert;
pub use sms::TwilioNotifier;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Failed to build email: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("SMS request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// One delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, alert: &Alert) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid delivery policy '{0}'. Accepted values: 'all', 'fallback'")]
pub struct DeliveryPolicyParseError(String);

/// How channels are used for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Every configured channel, every time.
    #[default]
    All,
    /// Channels in order until one succeeds.
    Fallback,
}

impl FromStr for DeliveryPolicy {
    type Err = DeliveryPolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "send-all" => Ok(DeliveryPolicy::All),
            "fallback" => Ok(DeliveryPolicy::Fallback),
            _ => Err(DeliveryPolicyParseError(s.to_string())),
        }
    }
}

impl Display for DeliveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryPolicy::All => write!(f, "all"),
            DeliveryPolicy::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug)]
pub enum ChannelStatus {
    Delivered,
    Failed(NotificationError),
    /// Not attempted because an earlier channel already delivered under `Fallback`.
    Skipped,
}

#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: &'static str,
    pub status: ChannelStatus,
}

/// Per-channel results of one dispatch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    /// At least one channel was actually tried, whatever its result.
    pub fn attempted(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| !matches!(o.status, ChannelStatus::Skipped))
    }

    pub fn delivered(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ChannelStatus::Delivered))
            .map(|o| o.channel)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &NotificationError)> + '_ {
        self.outcomes.iter().filter_map(|o| match &o.status {
            ChannelStatus::Failed(e) => Some((o.channel, e)),
            _ => None,
        })
    }
}

impl Display for DispatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.outcomes.is_empty() {
            return write!(f, "nothing sent");
        }
        let parts: Vec<String> = self
            .outcomes
            .iter()
            .map(|o| match &o.status {
                ChannelStatus::Delivered => format!("{}: delivered", o.channel),
                ChannelStatus::Failed(_) => format!("{}: failed", o.channel),
                ChannelStatus::Skipped => format!("{}: skipped", o.channel),
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

pub struct Dispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
    policy: DeliveryPolicy,
}

impl Dispatcher {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            notifiers: Vec::new(),
            policy,
        }
    }

    /// Email always, SMS only when credentials were supplied.
    pub fn from_config(config: &Config) -> Result<Self, NotificationError> {
        let mut dispatcher =
            Self::new(config.delivery).with_notifier(Box::new(EmailNotifier::new(&config.email)?));

        match &config.sms {
            Some(sms) => dispatcher = dispatcher.with_notifier(Box::new(TwilioNotifier::new(sms)?)),
            None => log::info!("SMS channel not configured; skipping it"),
        }

        Ok(dispatcher)
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.channel()).collect()
    }

    /// Sends one batched alert. Never fails as a whole: each channel's error is
    /// logged and kept in the report.
    pub async fn notify(&self, alert: &Alert) -> DispatchReport {
        let mut report = DispatchReport::default();
        if alert.is_empty() {
            return report;
        }

        let mut delivered = false;
        for notifier in &self.notifiers {
            let channel = notifier.channel();

            if delivered && self.policy == DeliveryPolicy::Fallback {
                log::debug!("Skipping {} channel; already delivered", channel);
                report.outcomes.push(ChannelOutcome {
                    channel,
                    status: ChannelStatus::Skipped,
                });
                continue;
            }

            let status = match notifier.send(alert).await {
                Ok(()) => {
                    log::info!(
                        "Sent {} notification for {} unit(s)",
                        channel,
                        alert.units.len()
                    );
                    delivered = true;
                    ChannelStatus::Delivered
                }
                Err(e) => {
                    log::error!("Failed to send {} notification: {}", channel, e);
                    ChannelStatus::Failed(e)
                }
            };
            report.outcomes.push(ChannelOutcome { channel, status });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitListing;
    use std::sync::{Arc, Mutex};

    struct FakeNotifier {
        channel: &'static str,
        fail: bool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        fn channel(&self) -> &'static str {
            self.channel
        }

        async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
            if self.fail {
                return Err(NotificationError::Rejected {
                    status: 401,
                    message: "bad credentials".to_string(),
                });
            }
            self.sent.lock().unwrap().push(alert.subject());
            Ok(())
        }
    }

    fn fake(channel: &'static str, fail: bool, sent: &Arc<Mutex<Vec<String>>>) -> Box<dyn Notifier> {
        Box::new(FakeNotifier {
            channel,
            fail,
            sent: sent.clone(),
        })
    }

    fn alert(count: usize) -> Alert {
        let units = (0..count)
            .map(|i| UnitListing {
                unit_id: format!("Unit {}", i),
                unit_type: "ARO 1 Bedroom".to_string(),
                price: Some(1500),
                available: true,
                raw_fingerprint: format!("f{}", i),
            })
            .collect();
        Alert::new(units, "https://example.com/floorplans")
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(DeliveryPolicy::All).with_notifier(fake("email", false, &sent));

        let report = dispatcher.notify(&alert(0)).await;

        assert!(report.outcomes.is_empty());
        assert!(!report.attempted());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_all_continues_past_failure() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(DeliveryPolicy::All)
            .with_notifier(fake("email", true, &sent))
            .with_notifier(fake("sms", false, &sent));

        let report = dispatcher.notify(&alert(2)).await;

        assert!(report.attempted());
        assert_eq!(report.delivered().collect::<Vec<_>>(), vec!["sms"]);
        let failures: Vec<_> = report.failures().map(|(c, _)| c).collect();
        assert_eq!(failures, vec!["email"]);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(report.to_string(), "email: failed, sms: delivered");
    }

    #[tokio::test]
    async fn test_send_all_uses_every_channel() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(DeliveryPolicy::All)
            .with_notifier(fake("email", false, &sent))
            .with_notifier(fake("sms", false, &sent));

        let report = dispatcher.notify(&alert(1)).await;

        assert_eq!(report.delivered().count(), 2);
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_stops_after_first_success() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(DeliveryPolicy::Fallback)
            .with_notifier(fake("email", false, &sent))
            .with_notifier(fake("sms", false, &sent));

        let report = dispatcher.notify(&alert(1)).await;

        assert_eq!(report.to_string(), "email: delivered, sms: skipped");
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_moves_on_after_failure() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(DeliveryPolicy::Fallback)
            .with_notifier(fake("email", true, &sent))
            .with_notifier(fake("sms", false, &sent));

        let report = dispatcher.notify(&alert(1)).await;

        assert_eq!(report.to_string(), "email: failed, sms: delivered");
    }

    #[test]
    fn test_delivery_policy_from_str() {
        assert_eq!("all".parse::<DeliveryPolicy>().unwrap(), DeliveryPolicy::All);
        assert_eq!(
            "Fallback".parse::<DeliveryPolicy>().unwrap(),
            DeliveryPolicy::Fallback
        );
        assert!("sometimes".parse::<DeliveryPolicy>().is_err());
    }
}

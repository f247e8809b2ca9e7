use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{Alert, NotificationError, Notifier};
use crate::config::SmsConfig;

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Deserialize)]
struct TwilioResponse {
    sid: Option<String>,
    message: Option<String>,
}

/// Text messages through the Twilio Messages API.
pub struct TwilioNotifier {
    client: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    to_number: String,
    max_len: usize,
}

impl TwilioNotifier {
    pub fn new(config: &SmsConfig) -> Result<Self, NotificationError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_base: TWILIO_API_BASE.to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            to_number: config.to_number.clone(),
            max_len: config.max_len,
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", self.api_base, self.account_sid)
    }
}

/// Pulls Twilio's human-readable `message` out of an error body, falling back
/// to the raw text.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<TwilioResponse>(body)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl Notifier for TwilioNotifier {
    fn channel(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let body = alert.sms_body(self.max_len);
        let form = [
            ("From", self.from_number.as_str()),
            ("To", self.to_number.as_str()),
            ("Body", body.as_str()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .inspect_err(|e| log::debug!("Twilio request error: {e:?}"))?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&text),
            });
        }

        if let Ok(TwilioResponse { sid: Some(sid), .. }) = serde_json::from_str(&text) {
            log::debug!("Twilio accepted message {}", sid);
        }
        Ok(())
    }
}

//! SMS provider integration
//!
//! Dispatches alert notifications through a Twilio-style REST API, one
//! message per recipient, accumulating per-recipient outcomes so partial
//! delivery is representable. When the provider is unconfigured the
//! dispatcher reports `configured: false` and the caller logs only; no
//! retry, no backoff.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SmsSettings;
use crate::models::AlertSeverity;

/// Per-recipient delivery record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub recipient: String,
    /// Provider message id, when accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_sid: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate dispatch outcome surfaced to the caller and the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub configured: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub delivery_results: Vec<DeliveryResult>,
    pub errors: Vec<String>,
}

impl DispatchOutcome {
    fn unconfigured() -> Self {
        Self {
            success: false,
            configured: false,
            success_count: 0,
            failure_count: 0,
            delivery_results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Provider readiness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub enabled: bool,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub sdk_installed: bool,
    pub status: String,
}

/// Body subset of the provider's message-creation response
#[derive(Debug, Deserialize)]
struct ProviderMessageResponse {
    sid: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

/// SMS dispatcher holding provider credentials and an HTTP client
#[derive(Debug, Clone)]
pub struct SmsDispatcher {
    settings: SmsSettings,
    client: reqwest::Client,
}

impl SmsDispatcher {
    pub fn new(settings: SmsSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Deliver `message` to every recipient, sequentially. Per-recipient
    /// failures accumulate; the overall `success` flag means every
    /// recipient was accepted.
    pub async fn dispatch(
        &self,
        recipients: &[String],
        message: &str,
        alert_id: &str,
        severity: AlertSeverity,
    ) -> DispatchOutcome {
        if !self.settings.enabled || !self.settings.configured() {
            info!(
                alert_id = %alert_id,
                "SMS provider not configured; skipping dispatch"
            );
            return DispatchOutcome::unconfigured();
        }

        // configured() checked above
        let account_sid = self.settings.account_sid.as_deref().unwrap_or_default();
        let auth_token = self.settings.auth_token.as_deref().unwrap_or_default();
        let from_number = self.settings.phone_number.as_deref().unwrap_or_default();

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.settings.api_base_url.trim_end_matches('/'),
            account_sid
        );
        let body = format!("[{}] {}", severity.to_string().to_uppercase(), message);

        let mut outcome = DispatchOutcome {
            success: false,
            configured: true,
            success_count: 0,
            failure_count: 0,
            delivery_results: Vec::new(),
            errors: Vec::new(),
        };

        for recipient in recipients {
            let response = self
                .client
                .post(&url)
                .basic_auth(account_sid, Some(auth_token))
                .form(&[("To", recipient.as_str()), ("From", from_number), ("Body", &body)])
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: ProviderMessageResponse = resp
                        .json()
                        .await
                        .unwrap_or(ProviderMessageResponse {
                            sid: None,
                            status: None,
                            message: None,
                        });
                    outcome.success_count += 1;
                    outcome.delivery_results.push(DeliveryResult {
                        recipient: recipient.clone(),
                        message_sid: parsed.sid,
                        status: parsed.status.unwrap_or_else(|| "queued".into()),
                        error: None,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp
                        .json::<ProviderMessageResponse>()
                        .await
                        .ok()
                        .and_then(|p| p.message)
                        .unwrap_or_else(|| format!("provider returned HTTP {}", status));
                    warn!(
                        alert_id = %alert_id,
                        recipient = %recipient,
                        error = %detail,
                        "SMS delivery rejected"
                    );
                    outcome.failure_count += 1;
                    outcome.errors.push(detail.clone());
                    outcome.delivery_results.push(DeliveryResult {
                        recipient: recipient.clone(),
                        message_sid: None,
                        status: "failed".into(),
                        error: Some(detail),
                    });
                }
                Err(e) => {
                    let detail = format!("request failed: {}", e);
                    warn!(
                        alert_id = %alert_id,
                        recipient = %recipient,
                        error = %detail,
                        "SMS delivery failed"
                    );
                    outcome.failure_count += 1;
                    outcome.errors.push(detail.clone());
                    outcome.delivery_results.push(DeliveryResult {
                        recipient: recipient.clone(),
                        message_sid: None,
                        status: "failed".into(),
                        error: Some(detail),
                    });
                }
            }
        }

        outcome.success = outcome.failure_count == 0 && outcome.success_count > 0;
        outcome
    }

    /// Provider readiness, with credentials masked for display
    pub fn status(&self) -> ProviderStatus {
        let configured = self.settings.configured();
        let status = if !self.settings.enabled {
            "disabled"
        } else if configured {
            "ready"
        } else {
            "unconfigured"
        };

        ProviderStatus {
            enabled: self.settings.enabled,
            configured,
            account_sid: self.settings.account_sid.as_deref().map(mask_credential),
            auth_token: self.settings.auth_token.as_deref().map(mask_credential),
            phone_number: self.settings.phone_number.clone(),
            sdk_installed: true,
            status: status.to_string(),
        }
    }
}

/// Keep the first and last four characters of a credential visible
fn mask_credential(value: &str) -> String {
    if value.len() <= 8 {
        return "****".to_string();
    }
    format!("{}****{}", &value[..4], &value[value.len() - 4..])
}

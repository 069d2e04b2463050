use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchReport, RecipientResult};
use crate::media::UploadedFile;
use crate::session::SessionState;

/// Raw fields of a `POST /send` body.
#[derive(Debug, Default)]
pub struct SendForm {
    pub numbers: Option<String>,
    pub message: Option<String>,
    pub delay_ms: Option<String>,
    pub media: Option<UploadedFile>,
}

/// `POST /send` as a JSON body. Carries no attachment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub numbers: Option<String>,
    pub message: Option<String>,
    pub delay_ms: Option<DelayValue>,
}

/// Browsers and scripts send the delay both as `500` and as `"500"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DelayValue {
    Number(f64),
    Text(String),
}

impl From<SendRequest> for SendForm {
    fn from(req: SendRequest) -> Self {
        Self {
            numbers: req.numbers,
            message: req.message,
            delay_ms: req.delay_ms.map(|delay| match delay {
                DelayValue::Number(ms) => ms.to_string(),
                DelayValue::Text(raw) => raw,
            }),
            media: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub batch_id: String,
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub results: Vec<RecipientResult>,
}

impl SendResponse {
    /// `recipients` counts everyone in the batch; the summary only claims the
    /// ones actually attempted when shutdown cut the batch short.
    pub fn from_report(batch_id: String, report: DispatchReport) -> Self {
        let recipients = report.total();
        let cancelled = report.cancelled();
        let message = if cancelled == 0 {
            format!("Sent messages to {} recipients", recipients)
        } else {
            format!(
                "Sent messages to {} of {} recipients, {} cancelled",
                recipients - cancelled,
                recipients,
                cancelled
            )
        };
        Self {
            success: true,
            message,
            batch_id,
            recipients,
            sent: report.sent(),
            failed: report.failed(),
            cancelled,
            results: report.results,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: SessionState,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dispatch::Outcome;

    fn report(outcomes: Vec<Outcome>) -> DispatchReport {
        DispatchReport {
            results: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| RecipientResult {
                    number: format!("{:010}", i),
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn summary_counts_every_recipient_when_nothing_was_cancelled() {
        let response = SendResponse::from_report(
            "b1".into(),
            report(vec![
                Outcome::Sent,
                Outcome::Failed {
                    error: "x".into(),
                },
                Outcome::Sent,
            ]),
        );
        assert_eq!(response.message, "Sent messages to 3 recipients");
        assert_eq!(response.recipients, 3);
        assert_eq!(response.failed, 1);
    }

    #[test]
    fn summary_separates_cancelled_recipients() {
        let response = SendResponse::from_report(
            "b2".into(),
            report(vec![Outcome::Sent, Outcome::Cancelled, Outcome::Cancelled]),
        );
        assert_eq!(response.message, "Sent messages to 1 of 3 recipients, 2 cancelled");
        assert_eq!(response.recipients, 3);
        assert_eq!(response.cancelled, 2);
    }

    #[test]
    fn json_request_accepts_numeric_or_string_delay() {
        let numeric: SendRequest =
            serde_json::from_value(json!({ "numbers": "1234567890", "message": "hi", "delayMs": 500 }))
                .unwrap();
        assert_eq!(SendForm::from(numeric).delay_ms.as_deref(), Some("500"));

        let text: SendRequest =
            serde_json::from_value(json!({ "numbers": "1234567890", "message": "hi", "delayMs": "250" }))
                .unwrap();
        assert_eq!(SendForm::from(text).delay_ms.as_deref(), Some("250"));

        let missing: SendRequest = serde_json::from_value(json!({ "message": "hi" })).unwrap();
        let form = SendForm::from(missing);
        assert!(form.numbers.is_none());
        assert!(form.delay_ms.is_none());
    }
}

use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::normalize::RecipientNumber;
use crate::session::{MessageContent, Messenger};

/// Chat id suffix the bridge uses for individual contacts.
pub const CONTACT_SUFFIX: &str = "@c.us";

pub fn destination(country_code: &str, number: &RecipientNumber) -> String {
    format!("{}{}{}", country_code, number.as_str(), CONTACT_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Sent,
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientResult {
    pub number: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub results: Vec<RecipientResult>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn sent(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Sent))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Cancelled))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Sends `content` to each recipient in order, waiting `delay` between sends.
///
/// A failed send is recorded and the loop moves on. Once `cancel` fires, the
/// pending send or wait is abandoned and every recipient without a result is
/// reported as cancelled.
pub async fn dispatch(
    messenger: &dyn Messenger,
    country_code: &str,
    recipients: &[RecipientNumber],
    content: &MessageContent,
    delay: Duration,
    cancel: &CancellationToken,
) -> DispatchReport {
    let mut report = DispatchReport {
        results: Vec::with_capacity(recipients.len()),
    };

    for (i, number) in recipients.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Dispatch cancelled, skipping {} recipients", recipients.len() - i);
            report
                .results
                .extend(recipients[i..].iter().map(|number| RecipientResult {
                    number: number.to_string(),
                    outcome: Outcome::Cancelled,
                }));
            break;
        }

        let chat_id = destination(country_code, number);
        let outcome = tokio::select! {
            result = messenger.send_message(&chat_id, content) => match result {
                Ok(()) => {
                    info!("Sent to {}", number);
                    Outcome::Sent
                }
                Err(err) => {
                    warn!("Failed to send to {}: {:#}", number, err);
                    Outcome::Failed {
                        error: format!("{:#}", err),
                    }
                }
            },
            _ = cancel.cancelled() => {
                warn!("Dispatch cancelled while sending to {}", number);
                Outcome::Cancelled
            }
        };
        report.results.push(RecipientResult {
            number: number.to_string(),
            outcome,
        });

        if i + 1 < recipients.len() && !delay.is_zero() {
            info!("Waiting {:?} before next...", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    report
}

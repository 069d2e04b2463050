use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, MISSING_FIELDS, NO_VALID_NUMBERS};
use crate::types::SendForm;

pub const NUMBER_LEN: usize = 10;

/// A phone number that passed validation: exactly ten ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipientNumber(String);

impl RecipientNumber {
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.len() == NUMBER_LEN && token.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(token.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Splits on commas, keeps valid numbers only, first occurrence wins.
pub fn normalize_numbers(raw: &str) -> Vec<RecipientNumber> {
    let mut seen = HashSet::new();
    raw.split(',')
        .filter_map(RecipientNumber::parse)
        .filter(|number| seen.insert(number.clone()))
        .collect()
}

/// Anything that is not a positive finite number of milliseconds means no delay.
pub fn parse_delay(raw: Option<&str>) -> Duration {
    let Some(ms) = raw.and_then(|raw| raw.trim().parse::<f64>().ok()) else {
        return Duration::ZERO;
    };
    if !ms.is_finite() || ms <= 0.0 {
        return Duration::ZERO;
    }
    // saturating cast, absurd values just mean a very long wait
    Duration::from_nanos((ms * 1_000_000.0) as u64)
}

/// The validated part of a send request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub recipients: Vec<RecipientNumber>,
    pub message: String,
    pub delay: Duration,
}

pub fn validate(form: &SendForm) -> Result<Batch, AppError> {
    let numbers = form.numbers.as_deref().filter(|s| !s.is_empty());
    let message = form.message.as_deref().filter(|s| !s.is_empty());
    let (Some(numbers), Some(message)) = (numbers, message) else {
        return Err(AppError::Validation(MISSING_FIELDS));
    };

    let recipients = normalize_numbers(numbers);
    if recipients.is_empty() {
        return Err(AppError::Validation(NO_VALID_NUMBERS));
    }

    Ok(Batch {
        recipients,
        message: message.to_string(),
        delay: parse_delay(form.delay_ms.as_deref()),
    })
}

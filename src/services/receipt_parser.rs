//! Locating and normalizing the structured payload in an extraction answer.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::models::{DEFAULT_CURRENCY, ReceiptData, UNKNOWN_MERCHANT, to_cents};

/// Why an extraction answer could not be turned into receipt data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Extraction returned no JSON object")]
    NoPayload,

    #[error("Extraction returned malformed JSON: {0}")]
    InvalidJson(String),

    #[error("Field {field} is not a valid amount: {value}")]
    InvalidAmount { field: &'static str, value: String },

    #[error("Field {0} must not be negative")]
    NegativeAmount(&'static str),

    #[error("purchased_at is not a valid date: {0}")]
    InvalidDate(String),
}

/// Slice from the first `{` to the last `}`, so code fences and prose around
/// the object are ignored.
pub fn locate_payload(text: &str) -> Result<&str, ParseError> {
    let start = text.find('{').ok_or(ParseError::NoPayload)?;
    let end = text.rfind('}').ok_or(ParseError::NoPayload)?;
    if end < start {
        return Err(ParseError::NoPayload);
    }
    Ok(&text[start..=end])
}

/// Parse an extraction answer into normalized receipt data.
///
/// Missing or empty fields take their defaults; `today` stands in for an
/// absent purchase date.
pub fn parse_receipt(text: &str, today: NaiveDate) -> Result<ReceiptData, ParseError> {
    let payload = locate_payload(text)?;
    let value: Value =
        serde_json::from_str(payload).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(ParseError::InvalidJson("payload is not an object".into()));
    };

    let merchant_name = text_field(&fields, "merchant_name")
        .unwrap_or(UNKNOWN_MERCHANT)
        .to_string();

    let purchased_at = match text_field(&fields, "purchased_at") {
        Some(raw) => parse_date(raw)?,
        None => today,
    };

    let total_amount = amount_field(&fields, "total_amount")?;
    let tax_amount = amount_field(&fields, "tax_amount")?;

    let currency = text_field(&fields, "currency")
        .map(normalize_currency)
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    Ok(ReceiptData {
        merchant_name,
        purchased_at,
        total_amount,
        tax_amount,
        currency,
    })
}

/// Non-empty trimmed string value.
fn text_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn amount_field(fields: &Map<String, Value>, name: &'static str) -> Result<Decimal, ParseError> {
    let raw = match fields.get(name) {
        None | Some(Value::Null) => return Ok(Decimal::new(0, 2)),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Decimal::new(0, 2)),
        Some(Value::String(s)) => s
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect(),
        Some(other) => {
            return Err(ParseError::InvalidAmount {
                field: name,
                value: other.to_string(),
            });
        }
    };

    let amount = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| ParseError::InvalidAmount {
            field: name,
            value: raw.clone(),
        })?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ParseError::NegativeAmount(name));
    }

    // Amounts are stored as i64 minor units
    if to_cents(amount).is_none() {
        return Err(ParseError::InvalidAmount {
            field: name,
            value: raw,
        });
    }

    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    Ok(rounded)
}

fn parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| ParseError::InvalidDate(raw.to_string()))
}

/// Map bare currency symbols onto ISO codes; codes are upper-cased.
fn normalize_currency(raw: &str) -> String {
    match raw {
        "$" => "USD".to_string(),
        "€" => "EUR".to_string(),
        "£" => "GBP".to_string(),
        "¥" => "JPY".to_string(),
        code => code.to_uppercase(),
    }
}

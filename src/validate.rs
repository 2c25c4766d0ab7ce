use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::messages;
use crate::gsm::{self, DataCoding};
use crate::types::Message;

// leading 1-9, 6 to 15 digits overall
static MSISDN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9]\d{5,14}$").expect("valid msisdn regex"));

static TEXT_ORIGINATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{N}]{1,11}$").expect("valid originator regex"));

/// Field name to human readable problem.
pub type ValidationErrors = BTreeMap<String, String>;

pub fn is_msisdn(value: &str) -> bool {
    MSISDN.is_match(value)
}

pub fn is_text_originator(value: &str) -> bool {
    TEXT_ORIGINATOR.is_match(value)
}

// the whole text has to fit, split points included
fn within_limit(body: &str) -> bool {
    let fits = match gsm::measure(body) {
        (DataCoding::Plain, len) => len <= gsm::MAX_PLAIN_SEPTETS,
        (DataCoding::Unicode, len) => len <= gsm::MAX_UNICODE_UNITS,
    };
    fits && gsm::part_count(body) <= gsm::MAX_PARTS
}

/// Checks every field and reports all failures at once.
pub fn validate(m: &Message) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if m.recipient == 0 {
        errors.insert("recipient".into(), messages::REQUIRED.into());
    } else if !is_msisdn(&m.recipient.to_string()) {
        errors.insert("recipient".into(), messages::MSISDN.into());
    }

    if m.originator.is_empty() {
        errors.insert("originator".into(), messages::REQUIRED.into());
    } else if !is_text_originator(&m.originator) && !is_msisdn(&m.originator) {
        errors.insert("originator".into(), messages::ORIGINATOR.into());
    }

    if m.body.is_empty() {
        errors.insert("message".into(), messages::REQUIRED.into());
    } else if !within_limit(&m.body) {
        errors.insert("message".into(), messages::MAX_LENGTH.into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

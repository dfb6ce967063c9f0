//! Comparison of a run result against a script's expected error and events.
//!
//! Expected documents are matched loosely: only the fields an expected
//! document names are compared, and the number `42` stands for "any value".

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ErrorRecord;
use crate::spec::RunResult;

const ANY_VALUE: u64 = 42;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Mismatch {
    #[error("expected error {expected:?}, got {actual:?}")]
    Error {
        expected: Option<ErrorRecord>,
        actual: Option<ErrorRecord>,
    },

    #[error("expected {expected} events, got {actual}: {actual_types:?}")]
    EventCount {
        expected: usize,
        actual: usize,
        actual_types: Vec<String>,
    },

    #[error("event {index} mismatch: expected {expected}, got {actual}")]
    Event {
        index: usize,
        expected: Value,
        actual: Value,
    },
}

/// Check `result` against the expected oracle.
///
/// # Errors
/// Returns the first [`Mismatch`] found, error first, then event count, then events in order.
pub fn verify(
    expected_error: Option<&ErrorRecord>,
    expected_events: &[Map<String, Value>],
    result: &RunResult,
) -> Result<(), Mismatch> {
    if !error_matches(expected_error, result.error.as_ref()) {
        return Err(Mismatch::Error {
            expected: expected_error.cloned(),
            actual: result.error.clone(),
        });
    }

    if expected_events.len() != result.events.len() {
        return Err(Mismatch::EventCount {
            expected: expected_events.len(),
            actual: result.events.len(),
            actual_types: result
                .events
                .iter()
                .map(|event| event.event_type.clone())
                .collect(),
        });
    }

    for (index, (expected, actual)) in expected_events.iter().zip(&result.events).enumerate() {
        let actual = Value::Object(actual.to_document());
        let expected = Value::Object(expected.clone());
        if !value_matches(&expected, Some(&actual)) {
            return Err(Mismatch::Event {
                index,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

fn error_matches(expected: Option<&ErrorRecord>, actual: Option<&ErrorRecord>) -> bool {
    match (expected, actual) {
        (None, None) => true,
        (Some(expected), Some(actual)) => {
            expected.error_type == actual.error_type
                && (expected.message.is_empty() || expected.message == actual.message)
        }
        _ => false,
    }
}

fn value_matches(expected: &Value, actual: Option<&Value>) -> bool {
    if expected.as_u64() == Some(ANY_VALUE) {
        return actual.is_some();
    }
    match (expected, actual) {
        (Value::Object(expected), Some(Value::Object(actual))) => expected
            .iter()
            .all(|(key, value)| value_matches(value, actual.get(key))),
        (Value::Number(expected), Some(Value::Number(actual))) => {
            expected.as_f64() == actual.as_f64()
        }
        (expected, Some(actual)) => expected == actual,
        (_, None) => false,
    }
}

//! Reduction of captured [`PoolEvent`]s into the canonical, pool-agnostic
//! records scripts are written against.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::PoolEvent;

/// Canonical event record. Only the fields relevant to `event_type` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
    #[serde(
        default,
        rename = "connectionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CanonicalEvent {
    fn bare(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            address: None,
            options: None,
            connection_id: None,
            reason: None,
        }
    }

    /// Render as a plain document, the same shape the expected events in a script use.
    #[must_use]
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("type".to_string(), Value::from(self.event_type.clone()));
        if let Some(address) = &self.address {
            doc.insert("address".to_string(), Value::from(address.clone()));
        }
        if let Some(options) = &self.options {
            doc.insert("options".to_string(), Value::Object(options.clone()));
        }
        if let Some(id) = self.connection_id {
            doc.insert("connectionId".to_string(), Value::from(id));
        }
        if let Some(reason) = &self.reason {
            doc.insert("reason".to_string(), Value::from(reason.clone()));
        }
        doc
    }
}

impl PoolEvent {
    /// Canonical type name, or `None` for events outside the legacy vocabulary.
    #[must_use]
    pub fn canonical_type(&self) -> Option<&'static str> {
        match self {
            PoolEvent::PoolCreated { .. } => Some("ConnectionPoolCreated"),
            PoolEvent::PoolClosed { .. } => Some("ConnectionPoolClosed"),
            PoolEvent::PoolCleared { .. } => Some("ConnectionPoolCleared"),
            PoolEvent::ConnectionCreated { .. } => Some("ConnectionCreated"),
            PoolEvent::ConnectionReady { .. } => Some("ConnectionReady"),
            PoolEvent::ConnectionClosed { .. } => Some("ConnectionClosed"),
            PoolEvent::CheckOutStarted { .. } => Some("ConnectionCheckOutStarted"),
            PoolEvent::CheckOutFailed { .. } => Some("ConnectionCheckOutFailed"),
            PoolEvent::CheckedOut { .. } => Some("ConnectionCheckedOut"),
            PoolEvent::CheckedIn { .. } => Some("ConnectionCheckedIn"),
            PoolEvent::PoolReady { .. } => None,
        }
    }
}

/// Normalize a single event; unrecognized kinds yield `None`.
#[must_use]
pub fn normalize_event(event: &PoolEvent) -> Option<CanonicalEvent> {
    let mut record = CanonicalEvent::bare(event.canonical_type()?);
    match event {
        PoolEvent::PoolCreated { address, options } => {
            record.address = Some(address.clone());
            record.options = Some(options.to_script());
        }
        PoolEvent::PoolClosed { address } | PoolEvent::PoolCleared { address } => {
            record.address = Some(address.clone());
        }
        PoolEvent::ConnectionCreated { connection_id, .. }
        | PoolEvent::ConnectionReady { connection_id, .. }
        | PoolEvent::CheckedOut { connection_id, .. }
        | PoolEvent::CheckedIn { connection_id, .. } => {
            record.connection_id = Some(*connection_id);
        }
        PoolEvent::ConnectionClosed {
            connection_id,
            reason,
            ..
        } => {
            record.connection_id = Some(*connection_id);
            record.reason = Some(reason.as_str().to_string());
        }
        PoolEvent::CheckOutFailed { reason, .. } => {
            record.reason = Some(reason.as_str().to_string());
        }
        PoolEvent::CheckOutStarted { .. } | PoolEvent::PoolReady { .. } => {}
    }
    Some(record)
}

/// Normalize captured events in order, dropping unrecognized kinds and any
/// canonical type listed in `ignore`.
#[must_use]
pub fn normalize_events(events: &[PoolEvent], ignore: &[String]) -> Vec<CanonicalEvent> {
    events
        .iter()
        .filter_map(normalize_event)
        .filter(|record| !ignore.iter().any(|ignored| *ignored == record.event_type))
        .collect()
}

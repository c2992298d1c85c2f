//! AMI event structure

use crate::{fields::Fields, headers::FieldName, protocol::AmiMessage};
use serde::Serialize;
use std::fmt;

/// One event frame as delivered to callers and subscribers.
///
/// Correlated events (carrying the `ActionID` of a pending action) are
/// collected into that action's [`ActionResponse`](crate::ActionResponse);
/// everything else is published to event subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AmiEvent {
    fields: Fields,
}

impl AmiEvent {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Value of the `Event` field, e.g. `PeerEntry`.
    ///
    /// `None` for a tokenless `Response` frame forwarded to subscribers.
    pub fn name(&self) -> Option<&str> {
        self.fields
            .get(FieldName::Event)
    }

    /// Look up a field by name.
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(name)
    }

    /// All fields in arrival order.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn action_id(&self) -> Option<&str> {
        self.fields
            .get(FieldName::ActionId)
    }

    /// `EventList` field (`start`, `Complete`, ...).
    pub fn event_list(&self) -> Option<&str> {
        self.fields
            .get(FieldName::EventList)
    }

    /// `true` if the `Event` field equals `name` (case-insensitive).
    pub fn is_named(&self, name: &str) -> bool {
        self.name()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }
}

impl From<AmiMessage> for AmiEvent {
    fn from(message: AmiMessage) -> Self {
        Self::new(message.fields)
    }
}

impl fmt::Display for AmiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}{}", name, self.fields),
            None => write!(f, "{}", self.fields),
        }
    }
}

//! Outbound actions and their correlated responses

use crate::{
    constants::{LINE_TERMINATOR, RESPONSE_SUCCESS},
    decode::FromFields,
    error::{AmiError, AmiResult},
    event::AmiEvent,
    fields::Fields,
    headers::FieldName,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// AMI frames are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol fields or whole actions.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::ProtocolError {
            message: format!("{} must not contain newlines", context),
        });
    }
    Ok(())
}

fn validate_name(s: &str, context: &str) -> AmiResult<()> {
    validate_no_newlines(s, context)?;
    if s.is_empty() || s.contains(':') {
        return Err(AmiError::ProtocolError {
            message: format!("{} must be non-empty and contain no ':'", context),
        });
    }
    Ok(())
}

/// An AMI action to submit through [`AmiClient::send`](crate::AmiClient::send).
///
/// The `ActionID` is always minted by the client; a caller-supplied one is
/// discarded.
///
/// ```
/// use asterisk_ami_tokio::Action;
///
/// let action = Action::new("Originate")
///     .field("Channel", "PJSIP/1001")
///     .field("Exten", "2000")
///     .variable("CALLERID(name)", "Front Desk");
/// assert_eq!(action.name(), "Originate");
/// assert_eq!(action.get("exten"), Some("2000"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    fields: Fields,
    variables: Vec<(String, String)>,
}

impl Action {
    /// Start an action with the given `Action:` name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Fields::new(),
            variables: Vec::new(),
        }
    }

    /// `Login` with the given credentials.
    pub fn login(username: &str, secret: &str) -> Self {
        Self::new("Login")
            .field(FieldName::Username.as_str(), username)
            .field(FieldName::Secret.as_str(), secret)
    }

    /// `Ping`, answered with `Response: Success` / `Ping: Pong`.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// `Logoff`; the server answers `Goodbye` and closes the socket.
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// Add or replace a field. `Action` and `ActionID` are ignored.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// In-place variant of [`field`](Self::field).
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if name.eq_ignore_ascii_case(FieldName::ActionId.as_str())
            || name.eq_ignore_ascii_case(FieldName::Action.as_str())
        {
            return;
        }
        self.fields
            .set(name, value);
    }

    /// Add a channel variable, sent as a `Variable: K=V` line.
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .push((key.into(), value.into()));
        self
    }

    /// Action name (`Action:` field value).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value by name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(name)
    }

    /// `true` for a `Logoff` action.
    pub fn is_logoff(&self) -> bool {
        self.name
            .eq_ignore_ascii_case("Logoff")
    }

    /// Check every name and value for characters that would break framing.
    pub fn validate(&self) -> AmiResult<()> {
        validate_name(&self.name, "action name")?;
        for (name, value) in self.fields.iter() {
            validate_name(name, "field name")?;
            validate_no_newlines(value, "field value")?;
        }
        for (key, value) in &self.variables {
            validate_no_newlines(key, "variable name")?;
            validate_no_newlines(value, "variable value")?;
            if key.is_empty() || key.contains('=') {
                return Err(AmiError::protocol_error(
                    "variable name must be non-empty and contain no '='",
                ));
            }
        }
        Ok(())
    }

    /// Serialize with the given `ActionID`, terminated by a blank line.
    pub fn to_wire_format(&self, action_id: &str) -> AmiResult<String> {
        use std::fmt::Write;

        self.validate()?;
        validate_no_newlines(action_id, "action id")?;

        let mut result = String::new();
        let _ = write!(result, "Action: {}{}", self.name, LINE_TERMINATOR);
        let _ = write!(result, "ActionID: {}{}", action_id, LINE_TERMINATOR);
        for (name, value) in self.fields.iter() {
            let _ = write!(result, "{}: {}{}", name, value, LINE_TERMINATOR);
        }
        for (key, value) in &self.variables {
            let _ = write!(result, "Variable: {}={}{}", key, value, LINE_TERMINATOR);
        }
        result.push_str(LINE_TERMINATOR);
        Ok(result)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case(FieldName::Secret.as_str()) {
                    (name, "[REDACTED]")
                } else {
                    (name, value)
                }
            })
            .collect();
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("fields", &fields)
            .field("variables", &self.variables)
            .finish()
    }
}

impl TryFrom<HashMap<String, String>> for Action {
    type Error = AmiError;

    /// Build from a flat map; the `Action` key (any case) names the action.
    fn try_from(mut map: HashMap<String, String>) -> AmiResult<Self> {
        let key = map
            .keys()
            .find(|k| k.eq_ignore_ascii_case(FieldName::Action.as_str()))
            .cloned()
            .ok_or_else(|| AmiError::protocol_error("action map has no Action key"))?;
        let name = map
            .remove(&key)
            .unwrap_or_default();

        let mut entries: Vec<(String, String)> = map
            .into_iter()
            .collect();
        entries.sort();

        let mut action = Action::new(name);
        for (field, value) in entries {
            action.set_field(field, value);
        }
        Ok(action)
    }
}

/// Result of a completed action: the response fields plus every event that
/// carried the same `ActionID`, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    fields: Fields,
    events: Vec<AmiEvent>,
}

impl ActionResponse {
    pub fn new(fields: Fields, events: Vec<AmiEvent>) -> Self {
        Self { fields, events }
    }

    /// `Response` field (`Success`, `Error`, `Follows`, `Goodbye`).
    pub fn response(&self) -> Option<&str> {
        self.fields
            .get(FieldName::Response)
    }

    /// `Message` field.
    pub fn message(&self) -> Option<&str> {
        self.fields
            .get(FieldName::Message)
    }

    /// `true` unless the server answered `Response: Error` (or nothing).
    pub fn is_success(&self) -> bool {
        match self.response() {
            Some(r) => !r.eq_ignore_ascii_case("Error"),
            None => false,
        }
    }

    /// `true` only for a literal `Response: Success`.
    pub fn is_literal_success(&self) -> bool {
        self.response() == Some(RESPONSE_SUCCESS)
    }

    /// Look up a response field.
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(name)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Correlated events, completion marker included.
    pub fn events(&self) -> &[AmiEvent] {
        &self.events
    }

    pub fn into_parts(self) -> (Fields, Vec<AmiEvent>) {
        (self.fields, self.events)
    }

    /// Decode every correlated event named `event_name` into `T`.
    pub fn decode_events<T: FromFields>(&self, event_name: &str) -> AmiResult<Vec<T>> {
        self.events
            .iter()
            .filter(|event| event.is_named(event_name))
            .map(|event| T::from_fields(event.fields()))
            .collect()
    }

    /// Convert to result based on success status.
    ///
    /// ```
    /// # use asterisk_ami_tokio::{ActionResponse, Fields};
    /// let fields: Fields = [("Response", "Error"), ("Message", "Permission denied")]
    ///     .into_iter()
    ///     .collect();
    /// let resp = ActionResponse::new(fields, Vec::new());
    /// assert!(resp.into_result().is_err());
    /// ```
    pub fn into_result(self) -> AmiResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(AmiError::ActionFailed {
            message: self
                .message()
                .unwrap_or("no message")
                .to_string(),
        })
    }
}

//! Typed field names for AMI actions, responses and events.

use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an unrecognized field name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field name: {0}")]
pub struct ParseFieldNameError(pub String);

/// Field names the client reads or writes itself.
///
/// Wire names are given after hyphen removal, which is how inbound frames
/// are keyed. Use with [`Fields::get()`](crate::Fields::get) for type-safe
/// lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum FieldName {
    Action,
    ActionId,
    Response,
    Message,
    Event,
    EventList,
    Username,
    Secret,
    Variable,
    Privilege,
    ObjectName,
    ChannelType,
    IpAddress,
    IpPort,
    Dynamic,
    Status,
    Description,
    Uri,
    Endpoint,
    UserAgent,
    RoundtripUsec,
}

impl FieldName {
    /// Every known name, in declaration order.
    pub const ALL: &'static [FieldName] = &[
        FieldName::Action,
        FieldName::ActionId,
        FieldName::Response,
        FieldName::Message,
        FieldName::Event,
        FieldName::EventList,
        FieldName::Username,
        FieldName::Secret,
        FieldName::Variable,
        FieldName::Privilege,
        FieldName::ObjectName,
        FieldName::ChannelType,
        FieldName::IpAddress,
        FieldName::IpPort,
        FieldName::Dynamic,
        FieldName::Status,
        FieldName::Description,
        FieldName::Uri,
        FieldName::Endpoint,
        FieldName::UserAgent,
        FieldName::RoundtripUsec,
    ];

    /// Name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Action => "Action",
            FieldName::ActionId => "ActionID",
            FieldName::Response => "Response",
            FieldName::Message => "Message",
            FieldName::Event => "Event",
            FieldName::EventList => "EventList",
            FieldName::Username => "Username",
            FieldName::Secret => "Secret",
            FieldName::Variable => "Variable",
            FieldName::Privilege => "Privilege",
            FieldName::ObjectName => "ObjectName",
            FieldName::ChannelType => "Channeltype",
            FieldName::IpAddress => "IPaddress",
            FieldName::IpPort => "IPport",
            FieldName::Dynamic => "Dynamic",
            FieldName::Status => "Status",
            FieldName::Description => "Description",
            FieldName::Uri => "Uri",
            FieldName::Endpoint => "Endpoint",
            FieldName::UserAgent => "UserAgent",
            FieldName::RoundtripUsec => "RoundtripUsec",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for FieldName {
    type Err = ParseFieldNameError;

    /// Case-insensitive, and hyphens are ignored the same way the frame
    /// parser drops them, so `Action-ID` parses as [`FieldName::ActionId`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .collect();
        Self::ALL
            .iter()
            .copied()
            .find(|name| {
                name.as_str()
                    .eq_ignore_ascii_case(&bare)
            })
            .ok_or_else(|| ParseFieldNameError(s.to_string()))
    }
}

//! Typed decoding of field maps into result structs

use crate::{
    error::{AmiError, AmiResult},
    fields::Fields,
    headers::FieldName,
};
use std::str::FromStr;

/// Types that can be built from an AMI field map.
pub trait FromFields: Sized {
    fn from_fields(fields: &Fields) -> AmiResult<Self>;
}

/// Required field as an owned string.
pub fn required(fields: &Fields, name: impl AsRef<str>) -> AmiResult<String> {
    let name = name.as_ref();
    fields
        .get(name)
        .map(str::to_string)
        .ok_or_else(|| AmiError::Decode {
            field: name.to_string(),
            reason: "missing".to_string(),
        })
}

/// Optional field; empty values and `-none-` / `(null)` placeholders read as `None`.
pub fn optional(fields: &Fields, name: impl AsRef<str>) -> Option<String> {
    fields
        .get(name)
        .filter(|v| !v.is_empty() && *v != "-none-" && *v != "(null)")
        .map(str::to_string)
}

/// Optional field parsed with [`FromStr`].
pub fn parsed<T>(fields: &Fields, name: impl AsRef<str>) -> AmiResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let name = name.as_ref();
    match optional(fields, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| AmiError::Decode {
                field: name.to_string(),
                reason: format!("{}: {}", raw, e),
            }),
    }
}

/// Asterisk yes/no flag. Missing reads as `false`.
pub fn flag(fields: &Fields, name: impl AsRef<str>) -> bool {
    fields
        .get(name)
        .is_some_and(|v| v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("true"))
}

/// `PeerEntry` event from a `SIPpeers` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub channel_type: String,
    pub object_name: String,
    pub ip_address: Option<String>,
    pub ip_port: Option<u16>,
    pub dynamic: bool,
    pub status: String,
    pub description: Option<String>,
}

impl FromFields for PeerEntry {
    fn from_fields(fields: &Fields) -> AmiResult<Self> {
        Ok(Self {
            channel_type: required(fields, FieldName::ChannelType)?,
            object_name: required(fields, FieldName::ObjectName)?,
            ip_address: optional(fields, FieldName::IpAddress),
            ip_port: parsed::<u16>(fields, FieldName::IpPort)?.filter(|port| *port != 0),
            dynamic: flag(fields, FieldName::Dynamic),
            status: required(fields, FieldName::Status)?,
            description: optional(fields, FieldName::Description),
        })
    }
}

/// `ContactList` event from a `PJSIPShowContacts` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEntry {
    pub object_name: String,
    pub uri: String,
    pub endpoint: Option<String>,
    pub status: Option<String>,
    pub user_agent: Option<String>,
    pub roundtrip_usec: Option<u64>,
}

impl FromFields for ContactEntry {
    fn from_fields(fields: &Fields) -> AmiResult<Self> {
        Ok(Self {
            object_name: required(fields, FieldName::ObjectName)?,
            uri: required(fields, FieldName::Uri)?,
            endpoint: optional(fields, FieldName::Endpoint),
            status: optional(fields, FieldName::Status),
            user_agent: optional(fields, FieldName::UserAgent),
            roundtrip_usec: parsed(fields, FieldName::RoundtripUsec)?,
        })
    }
}

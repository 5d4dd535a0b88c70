//! Identifier value objects.
//!
//! Each identifier is an immutable, `Copy`-or-cheap-`Clone` newtype around a
//! validated `String`. Construction is fallible (`TryFrom<&str>` /
//! `TryFrom<String>`); once built, the value is guaranteed to satisfy the
//! grammar documented on the type, so downstream code never re-validates it.

use std::fmt::{self, Display};

use crate::error::CoreError;

fn validate(
    raw: &str,
    max_len: usize,
    first: impl Fn(char) -> bool,
    rest: impl Fn(char) -> bool,
    kind: &'static str,
) -> Result<(), CoreError> {
    if raw.is_empty() || raw.len() > max_len {
        return Err(CoreError::Validation(format!(
            "{kind} must be 1..={max_len} bytes, got {}",
            raw.len()
        )));
    }
    let mut chars = raw.chars();
    let head = chars.next().expect("non-empty checked above");
    if !first(head) {
        return Err(CoreError::Validation(format!(
            "{kind} '{raw}' must start with a letter"
        )));
    }
    if !chars.all(&rest) {
        return Err(CoreError::Validation(format!(
            "{kind} '{raw}' contains an invalid character"
        )));
    }
    Ok(())
}

macro_rules! ascii_identifier {
    ($name:ident, $max:expr, $kind:expr, $rest:expr) => {
        #[doc = concat!("`", stringify!($name), "`: ", $kind, ".")]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validates and constructs a new identifier.
            pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
                let raw = raw.into();
                validate(&raw, $max, |c| c.is_ascii_alphabetic(), $rest, $kind)?;
                Ok(Self(raw))
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = CoreError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

ascii_identifier!(
    ServiceName,
    64,
    "service name",
    |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'
);
ascii_identifier!(
    MethodName,
    128,
    "RPC method name",
    |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'
);
ascii_identifier!(
    EventType,
    128,
    "event type",
    |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'
);

/// Identifies an instance of a service. Unlike the other identifiers,
/// instance IDs are often generated (hostname + pid, or a UUID) rather than
/// hand-written, so the grammar is looser: any non-empty, whitespace-free,
/// dot-free ASCII graphical string up to 128 bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > 128 {
            return Err(CoreError::Validation(format!(
                "instance id must be 1..=128 bytes, got {}",
                raw.len()
            )));
        }
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c == '.' || !c.is_ascii_graphic())
        {
            return Err(CoreError::Validation(format!(
                "instance id '{raw}' must be ASCII graphical with no whitespace or '.'"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for InstanceId {
    type Error = CoreError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for InstanceId {
    type Error = CoreError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Identifies an election quorum within a service. Defaults to `"default"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > 64 {
            return Err(CoreError::Validation(format!(
                "group id must be 1..=64 bytes, got {}",
                raw.len()
            )));
        }
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c == '.' || !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(CoreError::Validation(format!(
                "group id '{raw}' must be alphanumeric, '_' or '-', no dots or whitespace"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for GroupId {
    type Error = CoreError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn service_name_accepts_valid() {
        assert!(ServiceName::new("orders").is_ok());
        assert!(ServiceName::new("order_service-2").is_ok());
    }

    #[test]
    fn service_name_rejects_leading_digit() {
        assert!(ServiceName::new("2orders").is_err());
    }

    #[test]
    fn service_name_rejects_empty_and_overlong() {
        assert!(ServiceName::new("").is_err());
        assert!(ServiceName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn instance_id_rejects_whitespace_and_dots() {
        assert!(InstanceId::new("svc 1").is_err());
        assert!(InstanceId::new("svc.1").is_err());
        assert!(InstanceId::new("svc-1").is_ok());
    }

    #[test]
    fn group_id_defaults_to_default() {
        assert_eq!(GroupId::default().as_str(), "default");
    }

    #[test]
    fn group_id_rejects_dots() {
        assert!(GroupId::new("region.east").is_err());
    }

    #[test_case("orders", true; "plain lowercase")]
    #[test_case("order_service-2", true; "underscore and hyphen and digit")]
    #[test_case("2orders", false; "leading digit")]
    #[test_case("", false; "empty")]
    #[test_case("o.rders", false; "dot is not a valid service name character")]
    fn service_name_grammar(raw: &str, valid: bool) {
        assert_eq!(ServiceName::new(raw).is_ok(), valid);
    }

    #[test_case("svc-1", true; "hyphen")]
    #[test_case("svc_1", true; "underscore")]
    #[test_case("svc 1", false; "whitespace")]
    #[test_case("svc.1", false; "dot")]
    #[test_case("", false; "empty")]
    fn instance_id_grammar(raw: &str, valid: bool) {
        assert_eq!(InstanceId::new(raw).is_ok(), valid);
    }

    #[test_case("create_order", true; "underscore")]
    #[test_case("order.created", true; "dotted")]
    #[test_case("order-created", false; "hyphen is not a valid method/event character")]
    #[test_case("2create", false; "leading digit")]
    #[test_case("", false; "empty")]
    fn method_name_grammar(raw: &str, valid: bool) {
        assert_eq!(MethodName::new(raw).is_ok(), valid);
    }

    #[test_case("created", true; "plain")]
    #[test_case("order.created", true; "dotted")]
    #[test_case("order-created", false; "hyphen is not a valid method/event character")]
    fn event_type_grammar(raw: &str, valid: bool) {
        assert_eq!(EventType::new(raw).is_ok(), valid);
    }
}

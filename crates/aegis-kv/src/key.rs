//! Key validation (spec §4.2: "no dots, spaces, `*`, `>`, `/`; violations are
//! programmer errors, not runtime failures").

use crate::error::KvError;

pub fn validate_key(key: &str) -> Result<(), KvError> {
    if key.is_empty() {
        return Err(KvError::InvalidKey(key.to_string()));
    }
    let forbidden = ['.', ' ', '*', '>', '/'];
    if key.chars().any(|c| forbidden.contains(&c)) {
        return Err(KvError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Prefix keys (used for listing/watching) replace `.` with a NATS-safe
/// separator at the call site; callers pass a dot-joined logical key
/// (`service-instances.orders.orders-1`) which this module's *bucket*
/// layer maps to the wire-safe key before it ever reaches `validate_key`.
pub fn to_wire_key(logical_key: &str) -> String {
    logical_key.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_forbidden_characters() {
        assert!(validate_key("a b").is_err());
        assert!(validate_key("a*b").is_err());
        assert!(validate_key("a>b").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn accepts_plain_keys() {
        assert!(validate_key("orders_orders-1").is_ok());
    }

    #[test]
    fn wire_key_escapes_dots() {
        assert_eq!(to_wire_key("service-instances.orders.orders-1"), "service-instances_orders_orders-1");
    }
}

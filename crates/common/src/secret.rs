//! Secret types for room PINs.
//!
//! Room PINs and admin PINs are held as [`SecretString`] so that any struct
//! deriving `Debug` prints them redacted, and tracing fields cannot leak
//! them by accident. Reading the value requires an explicit
//! [`ExposeSecret::expose_secret`] call.
//!
//! ```rust
//! use common::secret::{pin_matches, SecretString};
//!
//! let pin = SecretString::from("1234");
//! assert!(format!("{pin:?}").contains("REDACTED"));
//! assert!(pin_matches(&pin, "1234"));
//! assert!(!pin_matches(&pin, "4321"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Compare a caller-entered PIN against a stored one.
///
/// Runs over the full length of both values so the time taken does not
/// reveal how many leading digits matched.
#[must_use]
pub fn pin_matches(expected: &SecretString, entered: &str) -> bool {
    let expected = expected.expose_secret().as_bytes();
    let entered = entered.as_bytes();
    let mut diff = expected.len() ^ entered.len();
    for (i, byte) in expected.iter().enumerate() {
        let other = entered.get(i).copied().unwrap_or(0);
        diff |= usize::from(byte ^ other);
    }
    diff == 0
}

/// True when the secret holds no characters.
#[must_use]
pub fn is_blank(secret: &SecretString) -> bool {
    secret.expose_secret().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let pin = SecretString::from("8675");
        let debug_str = format!("{pin:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("8675"));
    }

    #[test]
    fn test_pin_matches_exact_value_only() {
        let pin = SecretString::from("1234");
        assert!(pin_matches(&pin, "1234"));
        assert!(!pin_matches(&pin, "123"));
        assert!(!pin_matches(&pin, "12345"));
        assert!(!pin_matches(&pin, ""));
    }

    #[test]
    fn test_blank_secret() {
        assert!(is_blank(&SecretString::from("")));
        assert!(!is_blank(&SecretString::from("0")));
    }

    #[test]
    fn test_room_with_pin_is_safe_to_debug() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Room {
            number: String,
            pin: SecretString,
        }

        let room: Room =
            serde_json::from_str(r#"{"number": "600", "pin": "4242"}"#).expect("deserialize");
        assert_eq!(room.pin.expose_secret(), "4242");

        let debug = format!("{room:?}");
        assert!(debug.contains("600"));
        assert!(!debug.contains("4242"));
    }
}

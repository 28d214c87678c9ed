//! Unified error type for the correlation core.
//!
//! `CoreError` is the error type returned by every fallible public operation.
//! It serializes as `{ "kind": "...", "message": "..." }` so an embedding
//! application can programmatically distinguish failure categories without
//! string-matching on `Display` output.

use serde::ser::SerializeStruct;

/// Core-level error. Each variant maps to one row of the error taxonomy.
///
/// `AttributionMiss` deliberately has no variant here: an unmatched packet is
/// not a failure, it is recorded with `UNKNOWN` attribution and flows through
/// the normal packet pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No suitable interface found on `start`, or a named interface does not exist.
    #[error("{0}")]
    Configuration(String),

    /// The capture library failed to open a device.
    #[error("{0}")]
    CaptureOpen(String),

    /// A poll cycle (process, connection, or socket-table enumeration) exceeded
    /// its time budget or otherwise failed transiently.
    #[error("{0}")]
    TransientPoll(String),

    /// A frame could not be decoded. Never propagated out of the capture loop;
    /// this variant exists for callers that invoke the decoder directly.
    #[error("{0}")]
    Decode(String),

    /// A value that should never be absent was (e.g. an empty interface name on
    /// a packet record). Logged once per run, then bucketed and continued.
    #[error("{0}")]
    InvariantViolation(String),
}

impl CoreError {
    /// The error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Configuration(_) => "Configuration",
            CoreError::CaptureOpen(_) => "CaptureOpen",
            CoreError::TransientPoll(_) => "TransientPoll",
            CoreError::Decode(_) => "Decode",
            CoreError::InvariantViolation(_) => "InvariantViolation",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for CoreError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("CoreError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::TransientPoll(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(CoreError::Configuration("x".into()).kind(), "Configuration");
        assert_eq!(CoreError::CaptureOpen("x".into()).kind(), "CaptureOpen");
        assert_eq!(CoreError::TransientPoll("x".into()).kind(), "TransientPoll");
        assert_eq!(CoreError::Decode("x".into()).kind(), "Decode");
        assert_eq!(
            CoreError::InvariantViolation("x".into()).kind(),
            "InvariantViolation"
        );
    }

    #[test]
    fn test_error_display_shows_message() {
        let err = CoreError::CaptureOpen("device busy".into());
        assert_eq!(err.to_string(), "device busy");
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = CoreError::TransientPoll("enumeration timed out".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "TransientPoll");
        assert_eq!(json["message"], "enumeration timed out");
    }

    #[test]
    fn test_from_io_error_produces_transient_poll_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "enum timeout");
        let err: CoreError = io_err.into();
        assert_eq!(err.kind(), "TransientPoll");
        assert!(err.to_string().contains("enum timeout"));
    }

    #[test]
    fn test_all_variants_serialize_with_two_fields() {
        let variants: Vec<CoreError> = vec![
            CoreError::Configuration("a".into()),
            CoreError::CaptureOpen("b".into()),
            CoreError::TransientPoll("c".into()),
            CoreError::Decode("d".into()),
            CoreError::InvariantViolation("e".into()),
        ];
        for err in variants {
            let json = serde_json::to_value(&err).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj.len(), 2, "Expected exactly 2 fields for {err:?}");
            assert!(obj.contains_key("kind"));
            assert!(obj.contains_key("message"));
        }
    }
}

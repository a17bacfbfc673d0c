//! Error types for the injection webhook

use thiserror::Error;

/// Main error type for mutation operations
///
/// The variants map onto admission response classes: `Decode` is a
/// bad-request (malformed inbound object), `Validation` is a denial the
/// caller can fix and resubmit, `Render` and `Serialization` are internal
/// errors that must never result in a silently-unmodified pod.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The inbound pod object was malformed or structurally incomplete
    #[error("decode error: {0}")]
    Decode(String),

    /// An annotation carried a value the webhook does not accept
    #[error("validation error: {0}")]
    Validation(String),

    /// A sidecar config template failed to parse or render
    #[error("render error: {0}")]
    Render(String),

    /// JSON serialization of the pod or patch failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a render error with the given message
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: validation failures carry the offending annotation value
    ///
    /// A denied admission must tell the user exactly which token was wrong
    /// so they can fix the annotation and resubmit.
    #[test]
    fn story_validation_names_the_offending_value() {
        let err = Error::validation(
            "invalid mode token \"bogus\" in annotation spiffe-inject.io/mode",
        );
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("bogus"));

        match Error::validation("any message") {
            Error::Validation(msg) => assert_eq!(msg, "any message"),
            _ => panic!("expected Validation variant"),
        }
    }

    /// Story: render failures are defects, not user errors
    ///
    /// A template that fails to render indicates a bug in the webhook
    /// itself. These errors surface as internal errors and are never
    /// folded into an allowed-unchanged response.
    #[test]
    fn story_render_failures_are_internal() {
        let err = Error::render("helper config template failed: unknown variable");
        assert!(err.to_string().contains("render error"));

        fn response_class(err: &Error) -> &'static str {
            match err {
                Error::Decode(_) => "bad_request",
                Error::Validation(_) => "denied",
                Error::Render(_) | Error::Serialization(_) => "internal_error",
            }
        }

        assert_eq!(response_class(&err), "internal_error");
        assert_eq!(response_class(&Error::decode("no spec")), "bad_request");
        assert_eq!(response_class(&Error::validation("bad mode")), "denied");
    }

    #[test]
    fn serialization_errors_convert() {
        let json_err = serde_json::from_str::<()>("not json").unwrap_err();
        let err = Error::from(json_err);
        assert!(err.to_string().contains("serialization error"));
    }
}

/// Reasons an inbound frame is discarded.
///
/// None of these close the connection; the registry logs and moves on.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` frame: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{0}` must not be blank")]
    BlankField(&'static str),
}

impl FrameError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::BlankField(_) => "blank_field",
        }
    }

    /// Unknown types are expected from newer clients and are not worth a warning.
    pub fn is_forward_compatible(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(FrameError::MissingType.error_kind(), "missing_type");
        assert_eq!(FrameError::UnknownType("typing".into()).error_kind(), "unknown_type");
        assert_eq!(FrameError::BlankField("username").error_kind(), "blank_field");
    }

    #[test]
    fn only_unknown_type_is_forward_compatible() {
        assert!(FrameError::UnknownType("typing".into()).is_forward_compatible());
        assert!(!FrameError::MissingType.is_forward_compatible());
        assert!(!FrameError::NotAnObject.is_forward_compatible());
    }

    #[test]
    fn display_includes_type_name() {
        let err = FrameError::UnknownType("reaction".into());
        assert_eq!(err.to_string(), "unknown frame type `reaction`");
    }
}

use std::fmt;

/// Wire spelling of an unrecognised face.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Resolved identity of a face.
///
/// The backend and the embeddings cache both spell "no match" as the literal
/// string `"Unknown"`; that spelling is mapped to `Identity::Unknown` at the
/// boundary so the rest of the crate never compares against magic strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Identity {
    Known(String),
    #[default]
    Unknown,
}

impl Identity {
    /// Parse a wire name. Empty names and `"Unknown"` (any case) are unknown.
    pub fn from_name(name: &str) -> Self {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_NAME) {
            Identity::Unknown
        } else {
            Identity::Known(trimmed.to_string())
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(name) => f.write_str(name),
            Identity::Unknown => f.write_str(UNKNOWN_NAME),
        }
    }
}

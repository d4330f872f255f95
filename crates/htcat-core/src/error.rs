//! Error taxonomy for a download: transport, HTTP status, length parse,
//! sink, and internal-assertion failures.

use std::fmt;

/// Error surfaced from a download. The first error wins; anything raised
/// after cancellation is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtcatError {
    /// A request could not be issued or its body could not be read.
    Transport { operation: String, source: String },
    /// A response arrived with an unacceptable HTTP status.
    Status { status: String },
    /// The probe response carried a Content-Length that is not a
    /// non-negative integer.
    Length { value: String },
    /// The output sink rejected a write.
    Sink { source: String },
    /// An impossible segment ordering was observed. Indicates a bug.
    Assert { detail: String },
}

impl HtcatError {
    pub(crate) fn transport(operation: &str, source: impl fmt::Display) -> Self {
        HtcatError::Transport {
            operation: operation.to_string(),
            source: source.to_string(),
        }
    }

    pub(crate) fn status(code: u16, text: &str) -> Self {
        HtcatError::Status {
            status: format!("{} {}", code, text),
        }
    }

    pub(crate) fn length(value: &str) -> Self {
        HtcatError::Length {
            value: value.to_string(),
        }
    }

    pub(crate) fn sink(source: impl fmt::Display) -> Self {
        HtcatError::Sink {
            source: source.to_string(),
        }
    }

    pub(crate) fn assert(detail: String) -> Self {
        HtcatError::Assert { detail }
    }
}

impl fmt::Display for HtcatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HtcatError::Transport { operation, source } => {
                write!(f, "transport error in {}: {}", operation, source)
            }
            HtcatError::Status { status } => {
                write!(f, "unexpected HTTP status: {}", status)
            }
            HtcatError::Length { value } => {
                write!(f, "invalid Content-Length {:?}", value)
            }
            HtcatError::Sink { source } => {
                write!(f, "output write failed: {}", source)
            }
            HtcatError::Assert { detail } => {
                write!(f, "internal invariant violated: {}", detail)
            }
        }
    }
}

impl std::error::Error for HtcatError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let e = HtcatError::transport("range request", "connection refused");
        assert_eq!(
            e.to_string(),
            "transport error in range request: connection refused"
        );

        let e = HtcatError::status(416, "Range Not Satisfiable");
        assert!(e.to_string().contains("416 Range Not Satisfiable"));

        let e = HtcatError::length("banana");
        assert!(e.to_string().contains("\"banana\""));
    }

    #[test]
    fn test_clone_preserves_identity() {
        let e = HtcatError::status(500, "Internal Server Error");
        assert_eq!(e, e.clone());
    }
}

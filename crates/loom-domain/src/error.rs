/// Shared error type used across all loom crates.
///
/// Variants map onto the seven error kinds named in the turn-pipeline
/// propagation policy: `NotFound`/`Conflict`/`Validation` surface from
/// repositories, `Connection`/`Timeout` from provider and repository I/O,
/// `ConstraintViolation` from the enforcement lane, `FatalConfiguration`
/// from startup/config loading.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("fatal configuration: {0}")]
    FatalConfiguration(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The error kind, for propagation-policy decisions (§7): phases that
    /// degrade on transient errors check this rather than matching on the
    /// full enum so new variants don't silently change phase behavior.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Connection(_) | Error::Io(_) => ErrorKind::Connection,
            Error::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::FatalConfiguration(_) => ErrorKind::FatalConfiguration,
            Error::Provider { .. } | Error::Json(_) | Error::Other(_) => ErrorKind::Connection,
        }
    }

    /// Whether a phase with fail-mode "degrade" should continue the
    /// pipeline with a neutral/empty output rather than abort the turn.
    pub fn is_degradable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::FatalConfiguration | ErrorKind::Validation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Connection,
    ConstraintViolation,
    Timeout,
    FatalConfiguration,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_degradable() {
        assert!(Error::Connection("db down".into()).is_degradable());
        assert!(Error::Timeout("llm judge".into()).is_degradable());
    }

    #[test]
    fn fatal_configuration_is_not_degradable() {
        assert!(!Error::FatalConfiguration("missing provider".into()).is_degradable());
        assert!(!Error::Validation("bad input".into()).is_degradable());
    }
}

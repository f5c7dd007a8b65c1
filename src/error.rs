use std::path::PathBuf;
use thiserror::Error;

/// Failure classes that change how a run or a recipient is handled.
///
/// `Config`, `RecipientSource` and a `MissingResource` raised while loading
/// the template abort the run before any batch starts. Raised during
/// dispatch, every variant is scoped to one recipient.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read recipient list: {0}")]
    RecipientSource(String),

    #[error("missing resource {}", path.display())]
    MissingResource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid recipient address {0:?}")]
    InvalidRecipient(String),

    #[error("failed to assemble message: {0}")]
    MessageBuild(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    pub fn missing(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::MissingResource {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_resource_names_the_path() {
        let err = DispatchError::missing(
            "images/logo.png",
            std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(err.to_string(), "missing resource images/logo.png");
        assert_eq!(
            format!("{:#}", anyhow::Error::from(err)),
            "missing resource images/logo.png: not found"
        );
    }

    #[test]
    fn messages_name_the_failure_class() {
        assert_eq!(
            DispatchError::Config("BatchSize must be at least 1".into()).to_string(),
            "invalid configuration: BatchSize must be at least 1"
        );
        assert_eq!(
            DispatchError::InvalidRecipient("a b".into()).to_string(),
            "invalid recipient address \"a b\""
        );
    }
}

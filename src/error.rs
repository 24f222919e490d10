use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("cache backend error: {message}")]
    Backend { message: String },
    #[error("failed to encode cached value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true for failures reported by the store rather than by the caller.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_build_expected_variants() {
        let err = CacheError::configuration("missing primary key");
        assert!(matches!(err, CacheError::Configuration { .. }));
        assert_eq!(err.to_string(), "configuration error: missing primary key");
        assert!(!err.is_backend());

        let err = CacheError::backend("connection refused");
        assert_eq!(err.to_string(), "cache backend error: connection refused");
        assert!(err.is_backend());
    }
}

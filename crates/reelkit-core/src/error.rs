/// Core error types for the reelkit pipeline.

/// A specialized Result type for reelkit operations.
pub type ReelkitResult<T> = Result<T, ReelkitError>;

/// Top-level error type shared by the compute service, the asset loader and
/// the transition compositor.
#[derive(Debug, thiserror::Error)]
pub enum ReelkitError {
    /// The URL could not be resolved to bytes (storage or network failure).
    #[error("asset unavailable: {url}: {reason}")]
    AssetUnavailable { url: String, reason: String },

    /// Bytes were resolved but no decode strategy could turn them into a bitmap.
    #[error("decode failed: {url}: {reason}")]
    DecodeFailed { url: String, reason: String },

    /// The background execution context could not be created.
    #[error("compute unavailable: {0}")]
    ComputeUnavailable(String),

    /// A transition program failed to build. Fatal for the compositor instance.
    #[error("shader build failed for '{program}': {log}")]
    ShaderBuildFailed { program: String, log: String },

    /// A runtime error inside a single compute task.
    #[error("task {task} failed: {message}")]
    TaskFailed { task: u64, message: String },

    #[error("compute service stopped")]
    ServiceStopped,

    #[error("compositor is not configured")]
    NotConfigured,

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Other(String),
}

impl ReelkitError {
    /// Create an asset-unavailable error.
    pub fn asset_unavailable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ReelkitError::AssetUnavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a decode-failed error.
    pub fn decode_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        ReelkitError::DecodeFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a shader-build error for the named program.
    pub fn shader_build(program: impl Into<String>, log: impl Into<String>) -> Self {
        ReelkitError::ShaderBuildFailed {
            program: program.into(),
            log: log.into(),
        }
    }

    pub fn task_failed(task: u64, message: impl Into<String>) -> Self {
        ReelkitError::TaskFailed {
            task,
            message: message.into(),
        }
    }

    /// Whether this error should stop frame production.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReelkitError::ShaderBuildFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_unavailable_display() {
        let err = ReelkitError::asset_unavailable("local://42", "blob not found");
        assert_eq!(
            err.to_string(),
            "asset unavailable: local://42: blob not found"
        );
    }

    #[test]
    fn test_shader_build_is_fatal() {
        let err = ReelkitError::shader_build("kaleido", "unexpected token");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("kaleido"));
        assert!(!ReelkitError::decode_failed("a", "bad magic").is_fatal());
    }
}

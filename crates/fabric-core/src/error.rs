use thiserror::Error;

/// Non-overlapping error taxonomy shared by every fabric service.
///
/// Errors are recovered locally at the narrowest boundary that can return a
/// structured reply; they never propagate across conversations or clients.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FabricError {
    /// The structured `{success:false, error}` reply used on every
    /// request/response path.
    pub fn to_reply(&self) -> serde_json::Value {
        serde_json::json!({ "success": false, "error": self.to_string() })
    }
}

pub type Result<T> = std::result::Result<T, FabricError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_carries_message() {
        let reply = FabricError::NotFound("blob B1".into()).to_reply();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "not found: blob B1");
    }

    #[test]
    fn checksum_formats_both_digests() {
        let err = FabricError::Checksum {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.to_string().contains("aa"));
        assert!(err.to_string().contains("bb"));
    }
}

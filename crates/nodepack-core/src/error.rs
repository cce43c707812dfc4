use std::path::PathBuf;

use thiserror::Error;

/// The failure kinds an install can surface. Most sites wrap these in an
/// `anyhow` chain; callers that need to react to a specific kind (optional
/// downgrade, empty-manifest root, lock contention) downcast.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("cannot resolve '{spec}': {reason}")]
    Resolve { spec: String, reason: String },

    #[error("no package manifest at {0}")]
    ManifestMissing(PathBuf),

    #[error("optional dependency '{spec}' failed: {reason}")]
    OptionalFailure { spec: String, reason: String },

    #[error("invalid ideal tree at {node}: {reason}")]
    Validation { node: String, reason: String },

    #[error("filesystem operation failed on {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("fetch of {package} failed: {reason}")]
    Fetch { package: String, reason: String },

    #[error("extraction of {package} failed: {reason}")]
    Extract { package: String, reason: String },

    #[error("{phase} script of {package} failed: {reason}")]
    Lifecycle {
        phase: String,
        package: String,
        reason: String,
    },

    #[error("install location is locked: {0}")]
    Lock(String),
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::InstallError;

    #[test]
    fn messages_carry_the_failing_subject() {
        let err = InstallError::Resolve {
            spec: "left-pad@^9".to_string(),
            reason: "no satisfying version".to_string(),
        };
        assert!(err.to_string().contains("left-pad@^9"));

        let err = InstallError::ManifestMissing(PathBuf::from("/tmp/app/package.json"));
        assert!(err.to_string().contains("/tmp/app/package.json"));

        let err = InstallError::Lifecycle {
            phase: "postinstall".to_string(),
            package: "tool@1.0.0".to_string(),
            reason: "exit status 1".to_string(),
        };
        assert!(err.to_string().contains("postinstall"));
        assert!(err.to_string().contains("tool@1.0.0"));
    }

    #[test]
    fn kinds_survive_anyhow_downcast() {
        let err: anyhow::Error = InstallError::Lock("/tmp/node_modules/.staging.lock".to_string())
            .into();
        let err = err.context("install failed");
        assert!(matches!(
            err.downcast_ref::<InstallError>(),
            Some(InstallError::Lock(_))
        ));
    }
}

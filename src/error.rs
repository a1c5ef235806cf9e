use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration file '{0}' not found")]
    ConfigNotFound(String),

    #[error("workspace '{name}' not found on the {side} side")]
    WorkspaceNotFound { name: String, side: &'static str },

    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: ApiError,
    },

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MigrateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "invalid_config",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::WorkspaceNotFound { .. } => "workspace_not_found",
            Self::Api { source, .. } => source.code(),
            Self::Locked(_) => "locked",
            Self::Aborted(_) => "aborted",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
        }
    }

    /// True when the error ends a workspace's run rather than one pass.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Api { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    pub fn api(context: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_surface_the_collaborator_code() {
        let err = MigrateError::api("listing clients", ApiError::Unauthorized);
        assert_eq!(err.code(), "unauthorized");
        assert!(err.to_string().starts_with("listing clients: "));
        assert!(err.is_fatal());
        assert!(!MigrateError::api("listing tags", ApiError::NotFound).is_fatal());
    }

    #[test]
    fn workspace_not_found_names_the_side() {
        let err = MigrateError::WorkspaceNotFound {
            name: "Acme".into(),
            side: "destination",
        };
        assert_eq!(err.to_string(), "workspace 'Acme' not found on the destination side");
        assert_eq!(err.code(), "workspace_not_found");
    }
}

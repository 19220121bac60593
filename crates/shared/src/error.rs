//! Failure taxonomy for the desktop shell.

use std::fmt;
use std::path::PathBuf;

/// Which shipped artifact could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    BackendExecutable,
    BackendScript,
    UiBundle,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::BackendExecutable => "Backend executable",
            ArtifactKind::BackendScript => "Backend script",
            ArtifactKind::UiBundle => "UI bundle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("{kind} not found: {}", .path.display())]
    MissingArtifact { kind: ArtifactKind, path: PathBuf },

    #[error("Failed to start backend {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend process exited before becoming ready (code {}, signal {})", fmt_opt(.code), fmt_opt(.signal))]
    BackendCrashed {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Backend health check failed after {attempts} attempts")]
    HealthCheckTimeout { attempts: u32 },

    #[error("Backend supervisor is {state}; cannot {action}")]
    InvalidState { state: String, action: &'static str },

    #[error("Invalid UI URL {url}: {reason}")]
    InvalidUiUrl { url: String, reason: String },

    #[error("Startup cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// True for failures that mean the installation itself is broken.
    pub fn is_missing_artifact(&self) -> bool {
        matches!(self, ShellError::MissingArtifact { .. })
    }
}

fn fmt_opt(value: &Option<i32>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

//! Backend launch plan resolution.
//!
//! Development runs the Python script from the source tree; packaged builds run
//! the frozen executable shipped under the resources directory.

use shared::error::{ArtifactKind, ShellError};
use shared::settings::{BackendSettings, RunMode};
use std::path::{Path, PathBuf};

/// The exact command the supervisor spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl LaunchPlan {
    pub fn resolve(mode: RunMode, backend: &BackendSettings) -> Result<Self, ShellError> {
        if let Some((program, rest)) = backend.command.as_ref().and_then(|c| c.split_first()) {
            let mut args = rest.to_vec();
            args.extend(backend.listen_args());
            return Ok(Self {
                program: PathBuf::from(program),
                args,
                cwd: None,
            });
        }

        match mode {
            RunMode::Development => Self::development(backend),
            RunMode::Packaged => Self::packaged(backend),
        }
    }

    fn development(backend: &BackendSettings) -> Result<Self, ShellError> {
        let script = match &backend.dev_script {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()?.join("backend").join("server.py"),
        };
        if !script.is_file() {
            return Err(ShellError::MissingArtifact {
                kind: ArtifactKind::BackendScript,
                path: script,
            });
        }

        let mut args = vec![script.to_string_lossy().to_string()];
        args.extend(backend.listen_args());
        Ok(Self {
            program: PathBuf::from(&backend.python),
            args,
            cwd: script.parent().map(Path::to_path_buf),
        })
    }

    fn packaged(backend: &BackendSettings) -> Result<Self, ShellError> {
        let backend_dir = resources_dir(backend)
            .unwrap_or_else(|| PathBuf::from("resources"))
            .join("backend");
        let executable = backend_dir.join(packaged_backend_name());
        if !executable.is_file() {
            return Err(ShellError::MissingArtifact {
                kind: ArtifactKind::BackendExecutable,
                path: executable,
            });
        }

        Ok(Self {
            program: executable,
            args: backend.listen_args(),
            cwd: Some(backend_dir),
        })
    }

    /// Human-readable command line for logs.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

pub fn packaged_backend_name() -> &'static str {
    if cfg!(windows) {
        "server.exe"
    } else {
        "server"
    }
}

/// Configured resources dir, or the one shipped next to the executable.
pub fn resources_dir(backend: &BackendSettings) -> Option<PathBuf> {
    backend.resources_dir().or_else(default_resources_dir)
}

/// Locate the bundled resources directory.
///
/// Search order:
/// - macOS app bundle: `Contents/Resources`
/// - Linux AppImage: `$APPDIR/usr/share/nira`
/// - otherwise: `resources/` next to the executable
pub fn default_resources_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;

    // macOS: exe is at  …/Contents/MacOS/nira
    if cfg!(target_os = "macos") {
        if let Some(contents) = exe_dir.parent() {
            let candidate = contents.join("Resources");
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
    }

    if let Ok(appdir) = std::env::var("APPDIR") {
        let candidate = PathBuf::from(appdir).join("usr/share/nira");
        if candidate.is_dir() {
            return Some(candidate);
        }
    }

    Some(exe_dir.join("resources"))
}

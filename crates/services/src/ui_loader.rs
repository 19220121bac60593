//! Picks where the chat UI is loaded from.

use crate::launch;
use shared::error::{ArtifactKind, ShellError};
use shared::settings::{BackendSettings, RunMode, UiSettings};
use std::fmt;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiSource {
    /// Live dev server (development mode)
    DevServer(Url),
    /// Packaged `index.html`
    Bundle(PathBuf),
}

impl UiSource {
    /// Human-readable location for logs.
    pub fn location(&self) -> String {
        match self {
            UiSource::DevServer(url) => url.to_string(),
            UiSource::Bundle(index) => index.display().to_string(),
        }
    }

    /// URL the window loads. Bundle paths become `file://` URLs.
    pub fn url(&self) -> Result<Url, ShellError> {
        match self {
            UiSource::DevServer(url) => Ok(url.clone()),
            UiSource::Bundle(index) => {
                let absolute = if index.is_absolute() {
                    index.clone()
                } else {
                    std::env::current_dir()
                        .map_err(|e| ShellError::InvalidUiUrl {
                            url: index.display().to_string(),
                            reason: e.to_string(),
                        })?
                        .join(index)
                };
                Url::from_file_path(&absolute).map_err(|()| ShellError::InvalidUiUrl {
                    url: absolute.display().to_string(),
                    reason: "not a valid file path".into(),
                })
            }
        }
    }
}

impl fmt::Display for UiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiSource::DevServer(url) => write!(f, "dev server {}", url),
            UiSource::Bundle(index) => write!(f, "bundle {}", index.display()),
        }
    }
}

/// Packaged UI directory: configured, or `ui/dist` under the resources dir.
pub fn bundle_dir(ui: &UiSettings, backend: &BackendSettings) -> PathBuf {
    match &ui.bundle_dir {
        Some(dir) => PathBuf::from(dir),
        None => launch::resources_dir(backend)
            .unwrap_or_else(|| PathBuf::from("resources"))
            .join("ui")
            .join("dist"),
    }
}

/// A missing bundle is fatal; there is no fallback.
pub fn resolve(mode: RunMode, ui: &UiSettings, backend: &BackendSettings) -> Result<UiSource, ShellError> {
    match mode {
        RunMode::Development => {
            let url = Url::parse(&ui.dev_server_url).map_err(|e| ShellError::InvalidUiUrl {
                url: ui.dev_server_url.clone(),
                reason: e.to_string(),
            })?;
            Ok(UiSource::DevServer(url))
        }
        RunMode::Packaged => {
            let index = bundle_dir(ui, backend).join("index.html");
            if index.is_file() {
                Ok(UiSource::Bundle(index))
            } else {
                Err(ShellError::MissingArtifact {
                    kind: ArtifactKind::UiBundle,
                    path: index,
                })
            }
        }
    }
}

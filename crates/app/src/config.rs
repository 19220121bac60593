use shared::settings::NiraSettings;
use std::fs;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com.local", "NIRA", "Nira")
}

pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|proj| proj.config_dir().join("settings.json"))
}

/// Where the journal lives when no other place is configured.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|proj| proj.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".nira"))
}

/// Settings from `path`, or defaults when the file is missing or unreadable.
pub fn load_from(path: &Path) -> NiraSettings {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return NiraSettings::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read settings, using defaults");
            return NiraSettings::default();
        }
    };
    match serde_json::from_slice::<NiraSettings>(&bytes) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid settings, using defaults");
            NiraSettings::default()
        }
    }
}

/// Settings file plus `NIRA_*` environment overrides.
pub fn load() -> NiraSettings {
    let mut settings = match config_path() {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading settings");
            load_from(&path)
        }
        None => NiraSettings::default(),
    };
    settings.apply_env_overrides(|key| std::env::var(key).ok());
    settings
}

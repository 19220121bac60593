pub mod error;
pub mod journal;
pub mod poll;

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;
    use std::time::Duration;

    /// Returns true for the usual "on" spellings of an env flag.
    pub fn env_flag_enabled(value: &str) -> bool {
        let v = value.trim().to_ascii_lowercase();
        v == "1" || v == "true" || v == "yes"
    }

    /// Whether the shell runs from a source checkout or from an installed bundle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RunMode {
        /// Backend script run with Python, UI served by the dev server
        Development,
        /// Backend executable and UI bundle shipped under the resources dir
        Packaged,
    }

    impl RunMode {
        /// `--dev` on the command line or a truthy `NIRA_DEV` selects development mode.
        pub fn detect<I, S>(args: I, dev_env: Option<&str>) -> Self
        where
            I: IntoIterator<Item = S>,
            S: AsRef<str>,
        {
            let flag = args.into_iter().any(|a| a.as_ref() == "--dev");
            if flag || dev_env.map(env_flag_enabled).unwrap_or(false) {
                RunMode::Development
            } else {
                RunMode::Packaged
            }
        }

        pub fn is_dev(self) -> bool {
            self == RunMode::Development
        }

        pub fn as_str(self) -> &'static str {
            match self {
                RunMode::Development => "development",
                RunMode::Packaged => "packaged",
            }
        }
    }

    /// How the supervisor decides the backend process is worth health-checking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ReadinessStrategy {
        /// Pipe stdout and wait for the readiness marker (or the marker timeout)
        #[default]
        StdoutMarker,
        /// Discard output and go straight to health polling
        HealthOnly,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BackendSettings {
        pub host: String,
        pub port: u16,
        /// Interpreter used for the development script
        pub python: String,
        /// Development script; defaults to `backend/server.py` under the working dir
        pub dev_script: Option<String>,
        /// Replaces the resolved program entirely (host/port args are still appended)
        pub command: Option<Vec<String>>,
        /// Packaged resources dir; defaults to `resources/` next to the executable
        pub resources_dir: Option<String>,
        pub readiness: ReadinessStrategy,
        pub readiness_marker: String,
        pub marker_wait_ms: u64,
        pub settle_delay_ms: u64,
        pub health_path: String,
        pub health_timeout_ms: u64,
        pub health_interval_ms: u64,
        pub health_max_attempts: u32,
        pub stop_grace_ms: u64,
    }

    impl Default for BackendSettings {
        fn default() -> Self {
            Self {
                host: "127.0.0.1".into(),
                port: 8000,
                python: "python".into(),
                dev_script: None,
                command: None,
                resources_dir: None,
                readiness: ReadinessStrategy::StdoutMarker,
                readiness_marker: "Uvicorn running".into(),
                marker_wait_ms: 10_000,
                settle_delay_ms: 2_000,
                health_path: "/health".into(),
                health_timeout_ms: 2_000,
                health_interval_ms: 1_000,
                health_max_attempts: 30,
                stop_grace_ms: 5_000,
            }
        }
    }

    impl BackendSettings {
        pub fn base_url(&self) -> String {
            format!("http://{}:{}", self.host, self.port)
        }

        pub fn health_url(&self) -> String {
            format!("{}{}", self.base_url(), self.health_path)
        }

        /// Arguments every backend variant receives.
        pub fn listen_args(&self) -> Vec<String> {
            vec![
                "--host".into(),
                self.host.clone(),
                "--port".into(),
                self.port.to_string(),
            ]
        }

        pub fn resources_dir(&self) -> Option<PathBuf> {
            self.resources_dir.as_ref().map(PathBuf::from)
        }

        pub fn marker_wait(&self) -> Duration {
            Duration::from_millis(self.marker_wait_ms)
        }

        pub fn settle_delay(&self) -> Duration {
            Duration::from_millis(self.settle_delay_ms)
        }

        pub fn health_timeout(&self) -> Duration {
            Duration::from_millis(self.health_timeout_ms)
        }

        pub fn health_interval(&self) -> Duration {
            Duration::from_millis(self.health_interval_ms)
        }

        pub fn stop_grace(&self) -> Duration {
            Duration::from_millis(self.stop_grace_ms)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct UiSettings {
        pub dev_server_url: String,
        /// Directory holding the packaged `index.html`
        pub bundle_dir: Option<String>,
        pub window_title: String,
        pub window_width: u32,
        pub window_height: u32,
    }

    impl Default for UiSettings {
        fn default() -> Self {
            Self {
                dev_server_url: "http://localhost:3000".into(),
                bundle_dir: None,
                window_title: "NIRA - Neural Interactive Response Assistant".into(),
                window_width: 1400,
                window_height: 900,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ModelSettings {
        pub pull_poll_interval_ms: u64,
        /// Hard cap on status polls for one download job
        pub pull_max_polls: u32,
    }

    impl Default for ModelSettings {
        fn default() -> Self {
            Self {
                pull_poll_interval_ms: 1_000,
                pull_max_polls: 3_600,
            }
        }
    }

    impl ModelSettings {
        pub fn pull_poll_interval(&self) -> Duration {
            Duration::from_millis(self.pull_poll_interval_ms)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum JournalStorage {
        #[default]
        File,
        Sqlite,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct JournalSettings {
        pub storage: JournalStorage,
        pub storage_key: String,
    }

    impl Default for JournalSettings {
        fn default() -> Self {
            Self {
                storage: JournalStorage::File,
                storage_key: crate::journal::JOURNAL_STORAGE_KEY.into(),
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct NiraSettings {
        pub backend: BackendSettings,
        pub ui: UiSettings,
        pub models: ModelSettings,
        pub journal: JournalSettings,
    }

    impl NiraSettings {
        /// Apply `NIRA_*` overrides. `lookup` is usually `std::env::var(..).ok()`.
        pub fn apply_env_overrides<F>(&mut self, lookup: F)
        where
            F: Fn(&str) -> Option<String>,
        {
            if let Some(host) = lookup("NIRA_BACKEND_HOST").filter(|v| !v.trim().is_empty()) {
                self.backend.host = host.trim().to_string();
            }
            if let Some(port) = lookup("NIRA_BACKEND_PORT") {
                match port.trim().parse::<u16>() {
                    Ok(p) => self.backend.port = p,
                    Err(e) => tracing::warn!(value = %port, error = %e, "ignoring invalid NIRA_BACKEND_PORT"),
                }
            }
            if let Some(cmd) = lookup("NIRA_BACKEND_CMD") {
                let parts: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
                if !parts.is_empty() {
                    self.backend.command = Some(parts);
                }
            }
            if let Some(url) = lookup("NIRA_UI_DEV_URL").filter(|v| !v.trim().is_empty()) {
                self.ui.dev_server_url = url.trim().to_string();
            }
        }
    }
}

pub mod agent_api {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ChatRole {
        System,
        User,
        Assistant,
    }

    impl ChatRole {
        pub fn as_str(&self) -> &'static str {
            match self {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: ChatRole,
        pub content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub timestamp: Option<DateTime<Utc>>,
    }

    impl ChatMessage {
        pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
            Self {
                role,
                content: content.into(),
                timestamp: Some(Utc::now()),
            }
        }
    }

    /// The transcript shown in the chat window. Lives only as long as the window.
    #[derive(Debug, Clone, Default)]
    pub struct Conversation {
        messages: Vec<ChatMessage>,
    }

    impl Conversation {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, msg: ChatMessage) -> &ChatMessage {
            self.messages.push(msg);
            &self.messages[self.messages.len() - 1]
        }

        pub fn push_user(&mut self, content: impl Into<String>) -> &ChatMessage {
            self.push(ChatMessage::new(ChatRole::User, content))
        }

        pub fn push_assistant(&mut self, content: impl Into<String>) -> &ChatMessage {
            self.push(ChatMessage::new(ChatRole::Assistant, content))
        }

        pub fn push_system(&mut self, content: impl Into<String>) -> &ChatMessage {
            self.push(ChatMessage::new(ChatRole::System, content))
        }

        pub fn history(&self) -> &[ChatMessage] {
            &self.messages
        }

        pub fn last(&self) -> Option<&ChatMessage> {
            self.messages.last()
        }

        pub fn len(&self) -> usize {
            self.messages.len()
        }

        pub fn is_empty(&self) -> bool {
            self.messages.is_empty()
        }

        pub fn clear(&mut self) {
            self.messages.clear();
        }
    }
}

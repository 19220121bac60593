//! Desktop shell lifecycle: `new → launch → stop`.

use crate::config;
use providers::{ModelSelector, NiraClient};
use services::journal_store::{JsonFileStore, SqliteJournalStore};
use services::process_control::StopOutcome;
use services::{ui_loader, BackendSupervisor, UiSource};
use shared::error::ShellError;
use shared::journal::{Journal, JournalStore, StoreError};
use shared::settings::{JournalStorage, NiraSettings, RunMode};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub type DynJournal = Journal<Box<dyn JournalStore + Send>>;

pub struct Shell {
    settings: NiraSettings,
    mode: RunMode,
    supervisor: BackendSupervisor,
    cancel: CancellationToken,
}

impl Shell {
    pub fn new(settings: NiraSettings, mode: RunMode) -> Self {
        let supervisor = BackendSupervisor::new(mode, settings.backend.clone());
        Self {
            settings,
            mode,
            supervisor,
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &NiraSettings {
        &self.settings
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn supervisor(&self) -> &BackendSupervisor {
        &self.supervisor
    }

    /// Tripping this token aborts a pending startup.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bring the backend up, then work out where the UI comes from.
    ///
    /// The UI source is only resolved once the backend answered its health check.
    pub async fn launch(&mut self) -> Result<UiSource, ShellError> {
        tracing::info!(mode = self.mode.as_str(), "launching NIRA");
        self.supervisor.launch(&self.cancel).await?;
        let source = ui_loader::resolve(self.mode, &self.settings.ui, &self.settings.backend)?;
        tracing::info!(ui = %source, "UI source resolved");
        Ok(source)
    }

    /// Cancel any pending startup and shut the backend down.
    pub async fn stop(&mut self) -> StopOutcome {
        self.cancel.cancel();
        match self.supervisor.stop().await {
            Ok(outcome) => {
                tracing::info!(outcome = ?outcome, "backend stopped");
                outcome
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to stop backend");
                StopOutcome::NotRunning
            }
        }
    }

    pub fn client(&self) -> anyhow::Result<NiraClient> {
        NiraClient::from_settings(&self.settings.backend)
    }

    pub fn model_selector(&self) -> anyhow::Result<ModelSelector> {
        Ok(ModelSelector::new(self.client()?, self.settings.models.clone()))
    }

    pub fn open_journal(&self) -> Result<DynJournal, StoreError> {
        open_journal_in(&config::data_dir(), &self.settings)
    }

    /// Log what the freshly started backend reports. Failures here only degrade.
    pub async fn report_status(&self) {
        match self.client() {
            Ok(client) => match client.ollama_health().await {
                Ok(h) if h.ok => tracing::info!("ollama reachable"),
                Ok(h) => tracing::warn!(error = ?h.error, "ollama not reachable"),
                Err(e) => tracing::warn!(error = %e, "ollama health check failed"),
            },
            Err(e) => tracing::warn!(error = %e, "cannot build backend client"),
        }

        match self.model_selector() {
            Ok(mut models) => match models.refresh().await {
                Ok(()) => tracing::info!(
                    catalog = models.catalog().len(),
                    local = models.local().len(),
                    "models loaded"
                ),
                Err(e) => tracing::warn!(error = %e, "could not load models"),
            },
            Err(e) => tracing::warn!(error = %e, "cannot build backend client"),
        }

        match self.open_journal() {
            Ok(journal) => tracing::info!(entries = journal.len(), "journal opened"),
            Err(e) => tracing::warn!(error = %e, "journal unavailable"),
        }
    }
}

pub fn open_journal_in(dir: &Path, settings: &NiraSettings) -> Result<DynJournal, StoreError> {
    let store: Box<dyn JournalStore + Send> = match settings.journal.storage {
        JournalStorage::File => Box::new(JsonFileStore::new(dir, &settings.journal.storage_key)),
        JournalStorage::Sqlite => Box::new(SqliteJournalStore::open(dir.join("journal.db"))?),
    };
    Journal::open(store)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tiny_http::{Response, Server};

    /// Health endpoint that turns healthy once `healthy` is set.
    fn gated_health_server(healthy: Arc<AtomicBool>) -> u16 {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let code = if healthy.load(Ordering::SeqCst) { 200 } else { 503 };
                let _ = request.respond(Response::from_string("{}").with_status_code(code));
            }
        });
        port
    }

    fn test_settings(port: u16, resources: &Path) -> NiraSettings {
        let mut settings = NiraSettings::default();
        settings.backend.port = port;
        settings.backend.command = Some(vec![
            "sh".into(),
            "-c".into(),
            "echo 'INFO: Uvicorn running'; exec sleep 30".into(),
        ]);
        settings.backend.settle_delay_ms = 0;
        settings.backend.health_interval_ms = 50;
        settings.backend.health_max_attempts = 100;
        settings.backend.stop_grace_ms = 1_000;
        settings.backend.resources_dir = Some(resources.to_string_lossy().to_string());
        settings
    }

    fn write_bundle(resources: &Path) {
        let dist = resources.join("ui").join("dist");
        fs::create_dir_all(&dist).unwrap();
        fs::write(dist.join("index.html"), "<html></html>").unwrap();
    }

    #[tokio::test]
    async fn test_ui_resolves_only_after_backend_healthy() {
        let resources = tempfile::tempdir().unwrap();
        write_bundle(resources.path());
        let healthy = Arc::new(AtomicBool::new(false));
        let port = gated_health_server(healthy.clone());
        let mut shell = Shell::new(test_settings(port, resources.path()), RunMode::Packaged);

        let flip = healthy.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            flip.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let source = shell.launch().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(healthy.load(Ordering::SeqCst));
        assert!(matches!(source, UiSource::Bundle(ref p) if p.ends_with("index.html")));

        assert_eq!(shell.stop().await, StopOutcome::Graceful);
        assert_eq!(shell.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_missing_bundle_after_healthy_backend() {
        let resources = tempfile::tempdir().unwrap();
        let port = gated_health_server(Arc::new(AtomicBool::new(true)));
        let mut shell = Shell::new(test_settings(port, resources.path()), RunMode::Packaged);

        let err = shell.launch().await.unwrap_err();
        assert!(err.is_missing_artifact());
        // The backend is still up and must be stopped by the caller
        assert!(shell.supervisor().is_running());
        assert_eq!(shell.stop().await, StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_launch() {
        let resources = tempfile::tempdir().unwrap();
        let port = gated_health_server(Arc::new(AtomicBool::new(false)));
        let mut shell = Shell::new(test_settings(port, resources.path()), RunMode::Packaged);
        let cancel = shell.cancel_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
        let err = shell.launch().await.unwrap_err();
        assert!(matches!(err, ShellError::Cancelled));
        shell.stop().await;
        assert!(!shell.supervisor().is_running());
    }

    #[test]
    fn test_journal_storage_follows_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = NiraSettings::default();

        let mut journal = open_journal_in(dir.path(), &settings).unwrap();
        journal.create().unwrap();
        assert!(dir.path().join("nira-journal-entries.json").is_file());

        settings.journal.storage = JournalStorage::Sqlite;
        let journal = open_journal_in(dir.path(), &settings).unwrap();
        assert!(journal.is_empty());
        assert!(dir.path().join("journal.db").is_file());
    }
}

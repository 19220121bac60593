//! Model catalog, local models and the download-then-select workflow.

use crate::nira::{LocalModel, NiraClient, PullStatus};
use anyhow::{anyhow, Result};
use shared::poll::{poll_until, PollError, PollPolicy, PollStep};
use shared::settings::ModelSettings;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Updates sent while a model download is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum PullProgress {
    Started { model: String, job_id: String },
    Progress {
        model: String,
        percent: Option<f64>,
        status: Option<String>,
    },
    Finished { model: String },
}

pub struct ModelSelector {
    client: NiraClient,
    settings: ModelSettings,
    catalog: Vec<String>,
    local: Vec<LocalModel>,
    selected: Option<String>,
}

impl ModelSelector {
    pub fn new(client: NiraClient, settings: ModelSettings) -> Self {
        Self {
            client,
            settings,
            catalog: Vec::new(),
            local: Vec::new(),
            selected: None,
        }
    }

    pub fn catalog(&self) -> &[String] {
        &self.catalog
    }

    pub fn local(&self) -> &[LocalModel] {
        &self.local
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_local(&self, model: &str) -> bool {
        self.local.iter().any(|m| m.name == model)
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.catalog = self.client.catalog().await?;
        self.refresh_local().await
    }

    async fn refresh_local(&mut self) -> Result<()> {
        self.local = self.client.local_models().await?;
        tracing::debug!(local = self.local.len(), catalog = self.catalog.len(), "model lists refreshed");
        Ok(())
    }

    /// Select `model`, downloading it first when it is not local yet.
    ///
    /// On failure the previous selection stays and no job is kept.
    pub async fn select(
        &mut self,
        model: &str,
        progress: Option<&UnboundedSender<PullProgress>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.is_local(model) {
            self.selected = Some(model.to_string());
            return Ok(());
        }

        tracing::info!(model, "model not local, starting download");
        let start = self.client.pull_start(model).await?;
        if let Some(err) = start.error {
            return Err(anyhow!("pull of {} failed: {}", model, err));
        }

        if !start.done {
            let job_id = start
                .job_id
                .ok_or_else(|| anyhow!("pull of {} returned no job id", model))?;
            notify(
                progress,
                PullProgress::Started {
                    model: model.to_string(),
                    job_id: job_id.clone(),
                },
            );
            self.wait_for_job(model, &job_id, progress, cancel).await?;
        }

        if let Err(e) = self.refresh_local().await {
            tracing::warn!(model, error = %e, "could not reload local models after download");
        }
        if !self.is_local(model) {
            // The backend list can lag behind a finished job
            self.local.push(LocalModel {
                name: model.to_string(),
                size: None,
            });
        }
        self.selected = Some(model.to_string());
        notify(
            progress,
            PullProgress::Finished {
                model: model.to_string(),
            },
        );
        tracing::info!(model, "model ready");
        Ok(())
    }

    async fn wait_for_job(
        &self,
        model: &str,
        job_id: &str,
        progress: Option<&UnboundedSender<PullProgress>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let policy = PollPolicy::new(self.settings.pull_poll_interval(), self.settings.pull_max_polls)
            .fail_fast();
        let client = &self.client;
        let probe = move |_attempt: u32| probe_job(client, model, job_id, progress);

        match poll_until(&policy, cancel, probe).await {
            Ok(()) => Ok(()),
            Err(PollError::Failed { error, .. }) => Err(error),
            Err(PollError::Exhausted { attempts, .. }) => Err(anyhow!(
                "pull of {} not finished after {} status checks",
                model,
                attempts
            )),
            Err(PollError::Cancelled) => Err(anyhow!("pull of {} cancelled", model)),
        }
    }
}

async fn probe_job(
    client: &NiraClient,
    model: &str,
    job_id: &str,
    progress: Option<&UnboundedSender<PullProgress>>,
) -> Result<PollStep<()>> {
    let PullStatus {
        done,
        progress: percent,
        status,
        error,
    } = client.pull_status(job_id).await?;

    if let Some(err) = error {
        return Err(anyhow!("pull of {} failed: {}", model, err));
    }
    if done {
        return Ok(PollStep::Done(()));
    }
    notify(
        progress,
        PullProgress::Progress {
            model: model.to_string(),
            percent,
            status,
        },
    );
    Ok(PollStep::Pending)
}

fn notify(progress: Option<&UnboundedSender<PullProgress>>, update: PullProgress) {
    if let Some(tx) = progress {
        // Nobody listening is fine
        let _ = tx.send(update);
    }
}

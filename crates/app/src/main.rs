//! NIRA desktop shell: starts the Python backend, waits until it is healthy,
//! shows the chat UI in a window and stops the backend again when it closes.

mod config;
mod dialog;
mod shell;
mod window;

use shared::error::ShellError;
use shared::settings::RunMode;
use shell::Shell;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    init_tracing();

    // The window needs the main thread, so the runtime is driven from here
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let settings = config::load();
    let dev_env = std::env::var("NIRA_DEV").ok();
    let mode = RunMode::detect(std::env::args().skip(1), dev_env.as_deref());
    let mut shell = Shell::new(settings, mode);

    let quit = shell.cancel_token();
    runtime.spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            return;
        }
        tracing::info!("quit requested");
        quit.cancel();
    });

    let source = match runtime.block_on(shell.launch()) {
        Ok(source) => source,
        Err(ShellError::Cancelled) => {
            tracing::info!("startup cancelled");
            runtime.block_on(shell.stop());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            dialog::show_error(&e);
            runtime.block_on(shell.stop());
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(pid = ?shell.supervisor().pid(), mode = shell.mode().as_str(), "backend ready");
    runtime.block_on(shell.report_status());

    match window::run(runtime, shell, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "could not open the main window");
            ExitCode::FAILURE
        }
    }
}

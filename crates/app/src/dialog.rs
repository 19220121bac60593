//! Native error dialogs for fatal startup failures.

use shared::error::{ArtifactKind, ShellError};

pub const BACKEND_FAILED_TITLE: &str = "Backend Startup Failed";
pub const UI_MISSING_TITLE: &str = "UI Files Missing";

const BACKEND_FAILED_MESSAGE: &str =
    "Failed to start the NIRA backend server. Please check your installation.";
const UI_MISSING_MESSAGE: &str = "The UI files are missing. Please reinstall NIRA.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDialog {
    pub title: &'static str,
    pub message: &'static str,
    pub detail: String,
}

impl ErrorDialog {
    pub fn for_error(error: &ShellError) -> Self {
        let (title, message) = match error {
            ShellError::MissingArtifact {
                kind: ArtifactKind::UiBundle,
                ..
            }
            | ShellError::InvalidUiUrl { .. } => (UI_MISSING_TITLE, UI_MISSING_MESSAGE),
            _ => (BACKEND_FAILED_TITLE, BACKEND_FAILED_MESSAGE),
        };
        Self {
            title,
            message,
            detail: error.to_string(),
        }
    }

    /// Body text: the user-facing message, then the underlying error.
    pub fn description(&self) -> String {
        format!("{}\n\n{}", self.message, self.detail)
    }
}

/// Blocks until the user dismisses the dialog. Call from the main thread.
pub fn show_error(error: &ShellError) {
    let dialog = ErrorDialog::for_error(error);
    tracing::error!(title = dialog.title, error = %error, "startup failed");
    let _ = rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title(dialog.title)
        .set_description(dialog.description())
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

pub mod journal_store;
pub mod launch;
pub mod process_control;
pub mod supervisor;
pub mod ui_loader;

#[cfg(test)]
pub(crate) mod test_support;

pub use launch::LaunchPlan;
pub use supervisor::{BackendSupervisor, SupervisorState};
pub use ui_loader::UiSource;

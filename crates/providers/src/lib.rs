pub mod models;
pub mod nira;

pub use models::{ModelSelector, PullProgress};
pub use nira::{AvatarMedia, ChatTurn, NiraClient};

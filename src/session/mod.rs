pub mod manager;
pub mod settings;

pub use manager::{NOT_INITIALIZED_REPLY, ProjectSession, SessionStatus};

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod llm;
pub mod settings;
pub mod worker;

pub use config::Config;
pub use engine::{Engine, EngineParts, LocalModelStatus, RequestId, RewriteObserver, RewriteUpdate};
pub use error::{BackendResult, RewriteError};
pub use llm::types::{BackendKind, ImageAttachment, RewriteRequest, Skill, Style};

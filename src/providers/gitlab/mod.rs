mod client;
mod provider;
pub mod remote;
mod types;

pub use client::GitLabClient;
pub use provider::{GitLabProvider, ProjectResolver};
pub use types::{GitLabJob, GitLabPipeline, GitLabProject};

mod core;
mod jobs;
mod pipelines;
mod projects;

pub use self::core::GitLabClient;

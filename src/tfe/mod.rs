//! Client seam for the remote run service.

pub mod client;
pub mod discovery;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod models;

pub use client::{HttpClient, HttpOptions, RemoteClient};
pub use models::{
    Capacity, Page, Pagination, QueuedRun, Run, RunActions, RunCreateOptions, RunStatus, Workspace,
};

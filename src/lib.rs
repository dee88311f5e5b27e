pub mod backoff;
pub mod config;
pub mod context;
pub mod credentials;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod poller;
pub mod resource;
pub mod state;
pub mod tfe;

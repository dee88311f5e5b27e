//! CLI command implementations.
//!
//! | Module   | Commands handled                          |
//! |----------|-------------------------------------------|
//! | `run`    | `Create`, `Destroy`, `Read`, `Update`     |
//! | `config` | `Config`                                  |

pub mod config;
pub mod run;

pub use config::cmd_config;
pub use run::{cmd_create, cmd_destroy, cmd_read, cmd_update};

use anyhow::{Context, Result};
use std::path::Path;

use multispace::config::{MultispaceConfig, Overrides};
use multispace::credentials::{CliConfig, resolve_token};
use multispace::tfe::discovery;
use multispace::tfe::{HttpClient, HttpOptions};

/// Load `multispace.toml` and layer the environment and CLI flags on top.
///
/// Configuration warnings are logged when run flags are given, since only
/// create and destroy depend on the full `[run]` section.
pub fn load_config(path: &Path, overrides: Option<&Overrides>) -> Result<MultispaceConfig> {
    let mut config = MultispaceConfig::load_or_default(path)?;
    config.apply_env();
    if let Some(overrides) = overrides {
        config.apply_overrides(overrides);
        for warning in config.validate() {
            tracing::warn!("{}", warning);
        }
    }
    Ok(config)
}

/// Resolve credentials, discover the API root and build the HTTP client.
pub async fn connect(config: &MultispaceConfig) -> Result<HttpClient> {
    let hostname = config.provider.hostname.as_str();
    let cli_config = CliConfig::discover();
    let token = resolve_token(config.provider.token.as_deref(), &cli_config, hostname)?;

    let options = HttpOptions {
        user_agent: None,
        insecure_skip_verify: config.provider.ssl_skip_verify,
    };
    let http = options.build_http()?;
    let host = discovery::host_url(hostname)?;
    let base = discovery::discover(&http, &host, cli_config.services_for(hostname))
        .await
        .with_context(|| format!("Failed to discover the API for {}", hostname))?;

    tracing::debug!(%base, "configured client");
    Ok(HttpClient::with_http(http, base, token))
}

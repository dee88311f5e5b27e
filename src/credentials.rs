//! Terraform CLI configuration: stored API tokens and pinned host services.
//!
//! Two files are consulted. The main CLI config is located through
//! `TF_CLI_CONFIG_FILE`, then `TERRAFORM_CONFIG`, then `~/.terraformrc`. The
//! credentials file written by `terraform login` lives at
//! `~/.terraform.d/credentials.tfrc.json`. Only the JSON syntax is understood.
//! Both files are optional; problems reading them are logged and ignored.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A `host` block overriding service discovery for one hostname.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostBlock {
    #[serde(default)]
    pub services: Map<String, Value>,
}

/// The parts of a Terraform CLI config file this tool reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default, rename = "host")]
    pub hosts: HashMap<String, HostBlock>,
    #[serde(default)]
    pub credentials: HashMap<String, Map<String, Value>>,
}

impl CliConfig {
    /// Read and merge the main CLI config and the credentials file.
    pub fn discover() -> Self {
        Self::discover_with(|key| std::env::var(key).ok(), dirs::home_dir())
    }

    pub fn discover_with(
        lookup: impl Fn(&str) -> Option<String>,
        home: Option<PathBuf>,
    ) -> Self {
        let main = locate_config_file(&lookup, home.as_deref())
            .map(|path| Self::read(&path))
            .unwrap_or_default();

        let credentials = match home {
            Some(home) => Self::read(&credentials_file(&home)),
            None => {
                warn!("Could not determine home directory for the credentials file");
                Self::default()
            }
        };

        Self::merge(main, credentials)
    }

    /// Host blocks come from the main config only. For credentials, the main
    /// config wins over the credentials file on overlapping hosts.
    pub fn merge(main: Self, credentials: Self) -> Self {
        let mut combined = credentials.credentials;
        combined.extend(main.credentials);
        Self {
            hosts: main.hosts,
            credentials: combined,
        }
    }

    /// Parse a JSON CLI config file, or return an empty one on any problem.
    pub fn read(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "CLI config file not present");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), "Error reading CLI config or credentials file: {}", e);
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "Error parsing CLI config or credentials file: {}", e);
                Self::default()
            }
        }
    }

    /// Stored token for `hostname`, if any.
    pub fn token_for(&self, hostname: &str) -> Option<String> {
        let wanted = normalize_host(hostname);
        self.credentials
            .iter()
            .find(|(host, _)| normalize_host(host) == wanted)
            .and_then(|(_, creds)| creds.get("token"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }

    /// Services pinned for `hostname` by a `host` block.
    pub fn services_for(&self, hostname: &str) -> Option<&Map<String, Value>> {
        let wanted = normalize_host(hostname);
        self.hosts
            .iter()
            .find(|(host, _)| normalize_host(host) == wanted)
            .map(|(_, block)| &block.services)
            .filter(|services| !services.is_empty())
    }
}

/// Main CLI config location, following Terraform's own lookup order.
fn locate_config_file(
    lookup: &impl Fn(&str) -> Option<String>,
    home: Option<&Path>,
) -> Option<PathBuf> {
    for var in ["TF_CLI_CONFIG_FILE", "TERRAFORM_CONFIG"] {
        if let Some(path) = lookup(var).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
    }
    match home {
        Some(home) => Some(home.join(".terraformrc")),
        None => {
            warn!("Could not determine home directory for the CLI config file");
            None
        }
    }
}

fn credentials_file(home: &Path) -> PathBuf {
    home.join(".terraform.d").join("credentials.tfrc.json")
}

/// Hostnames compare case-insensitively, ignoring a scheme, trailing slash
/// or the default HTTPS port.
fn normalize_host(host: &str) -> String {
    let host = host
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let host = host.strip_suffix(":443").unwrap_or(host);
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Pick the API token: the configured value (file or `TFE_TOKEN`), then the
/// CLI config.
pub fn resolve_token(
    configured: Option<&str>,
    cli: &CliConfig,
    hostname: &str,
) -> anyhow::Result<String> {
    if let Some(token) = configured.filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }
    debug!(hostname, "Attempting to fetch token from Terraform CLI configuration");
    cli.token_for(hostname).ok_or_else(|| {
        anyhow::anyhow!(
            "Required token could not be found for {}. Set [provider].token, the TFE_TOKEN \
             environment variable, or run `terraform login {}`",
            hostname,
            hostname
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write(path: &Path, value: Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_reads_credentials_file_from_home() {
        let home = tempdir().unwrap();
        write(
            &credentials_file(home.path()),
            json!({ "credentials": { "app.terraform.io": { "token": "from-login" } } }),
        );

        let cli = CliConfig::discover_with(|_| None, Some(home.path().to_path_buf()));
        assert_eq!(cli.token_for("app.terraform.io").as_deref(), Some("from-login"));
        assert_eq!(cli.token_for("other.example.com"), None);
    }

    #[test]
    fn test_main_config_overrides_credentials_file() {
        let home = tempdir().unwrap();
        write(
            &credentials_file(home.path()),
            json!({ "credentials": {
                "app.terraform.io": { "token": "login" },
                "tfe.example.com": { "token": "login-tfe" }
            } }),
        );
        let main = home.path().join("custom.tfrc.json");
        write(
            &main,
            json!({
                "credentials": { "app.terraform.io": { "token": "manual" } },
                "host": { "tfe.example.com": { "services": { "tfe.v2": "/api/v2/" } } }
            }),
        );
        let main_path = main.to_string_lossy().to_string();

        let cli = CliConfig::discover_with(
            |key| (key == "TF_CLI_CONFIG_FILE").then(|| main_path.clone()),
            Some(home.path().to_path_buf()),
        );
        assert_eq!(cli.token_for("app.terraform.io").as_deref(), Some("manual"));
        assert_eq!(cli.token_for("tfe.example.com").as_deref(), Some("login-tfe"));
        assert!(cli.services_for("TFE.example.com").is_some());
    }

    #[test]
    fn test_terraform_config_used_when_cli_config_file_unset() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("legacy.json");
        write(&main, json!({ "credentials": { "h.example.com": { "token": "t" } } }));
        let main_path = main.to_string_lossy().to_string();

        let cli = CliConfig::discover_with(
            |key| (key == "TERRAFORM_CONFIG").then(|| main_path.clone()),
            None,
        );
        assert_eq!(cli.token_for("h.example.com").as_deref(), Some("t"));
    }

    #[test]
    fn test_unparsable_file_is_ignored() {
        let home = tempdir().unwrap();
        std::fs::write(home.path().join(".terraformrc"), "credentials \"x\" { token = \"hcl\" }")
            .unwrap();
        let cli = CliConfig::discover_with(|_| None, Some(home.path().to_path_buf()));
        assert!(cli.credentials.is_empty());
    }

    #[test]
    fn test_host_normalization() {
        assert_eq!(normalize_host("HTTPS://App.Terraform.io:443/"), "app.terraform.io");
        assert_eq!(normalize_host("tfe.example.com."), "tfe.example.com");
    }

    #[test]
    fn test_resolve_token_order() {
        let mut cli = CliConfig::default();
        cli.credentials.insert(
            "app.terraform.io".into(),
            json!({ "token": "cli" }).as_object().cloned().unwrap(),
        );

        let token = resolve_token(Some("configured"), &cli, "app.terraform.io");
        assert_eq!(token.unwrap(), "configured");
        let token = resolve_token(Some(""), &cli, "app.terraform.io");
        assert_eq!(token.unwrap(), "cli");
        let token = resolve_token(None, &cli, "app.terraform.io");
        assert_eq!(token.unwrap(), "cli");

        let err = resolve_token(None, &cli, "tfe.example.com").unwrap_err();
        assert!(err.to_string().contains("terraform login"));
    }
}

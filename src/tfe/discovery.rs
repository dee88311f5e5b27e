//! Remote service discovery.
//!
//! Hosts advertise their API root in `/.well-known/terraform.json`, keyed by
//! service id. Host blocks in the CLI configuration can pin those services
//! and skip the lookup entirely.

use reqwest::Url;
use serde_json::{Map, Value};

use crate::errors::ClientError;

/// Service ids this client can talk to, most preferred first.
pub const SERVICE_IDS: &[&str] = &["tfe.v2.2", "tfe.v2.1", "tfe.v2"];

const WELL_KNOWN_PATH: &str = ".well-known/terraform.json";

/// Root URL of a host given as a bare hostname or a full URL.
pub fn host_url(hostname: &str) -> Result<Url, ClientError> {
    let raw = if hostname.starts_with("http://") || hostname.starts_with("https://") {
        hostname.to_string()
    } else {
        format!("https://{}", hostname)
    };
    let mut url =
        Url::parse(&raw).map_err(|e| ClientError::Discovery(format!("invalid host {hostname:?}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Pick the API root from a discovery document.
pub fn resolve_service(host: &Url, services: &Map<String, Value>) -> Result<Url, ClientError> {
    for id in SERVICE_IDS {
        if let Some(location) = services.get(*id).and_then(Value::as_str) {
            let mut url = host
                .join(location)
                .map_err(|e| ClientError::Discovery(format!("bad location for {id}: {e}")))?;
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            return Ok(url);
        }
    }
    Err(ClientError::Discovery(format!(
        "host {} does not provide any of the supported services: {}",
        host,
        SERVICE_IDS.join(", ")
    )))
}

/// Discover the API root for `host`, honouring pinned services first.
pub async fn discover(
    http: &reqwest::Client,
    host: &Url,
    pinned: Option<&Map<String, Value>>,
) -> Result<Url, ClientError> {
    if let Some(services) = pinned {
        tracing::debug!(%host, "using services pinned in CLI configuration");
        return resolve_service(host, services);
    }

    let well_known = host
        .join(WELL_KNOWN_PATH)
        .map_err(|e| ClientError::Discovery(e.to_string()))?;
    tracing::debug!(url = %well_known, "discovering remote services");

    let response = http.get(well_known).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Discovery(format!(
            "{} answered discovery with HTTP {}",
            host,
            status.as_u16()
        )));
    }
    let services: Map<String, Value> = response
        .json()
        .await
        .map_err(|e| ClientError::Discovery(format!("invalid discovery document: {e}")))?;
    resolve_service(host, &services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn services(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_host_url_defaults_to_https() {
        let url = host_url("app.terraform.io").unwrap();
        assert_eq!(url.as_str(), "https://app.terraform.io/");
    }

    #[test]
    fn test_host_url_keeps_explicit_scheme() {
        let url = host_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_resolve_prefers_newest_service() {
        let host = host_url("tfe.example.com").unwrap();
        let doc = services(json!({
            "modules.v1": "/api/registry/v1/modules/",
            "tfe.v2": "/api/v2/",
            "tfe.v2.2": "/api/v2/"
        }));
        let url = resolve_service(&host, &doc).unwrap();
        assert_eq!(url.as_str(), "https://tfe.example.com/api/v2/");
    }

    #[test]
    fn test_resolve_accepts_absolute_location_without_slash() {
        let host = host_url("tfe.example.com").unwrap();
        let doc = services(json!({ "tfe.v2.1": "https://api.example.com/v2" }));
        let url = resolve_service(&host, &doc).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/");
    }

    #[test]
    fn test_resolve_fails_without_supported_service() {
        let host = host_url("tfe.example.com").unwrap();
        let doc = services(json!({ "modules.v1": "/m/" }));
        let err = resolve_service(&host, &doc).unwrap_err();
        assert!(matches!(err, ClientError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_pinned_services_skip_network() {
        let host = host_url("unreachable.invalid").unwrap();
        let doc = services(json!({ "tfe.v2.2": "/custom/api/" }));
        let url = discover(&reqwest::Client::new(), &host, Some(&doc))
            .await
            .unwrap();
        assert_eq!(url.as_str(), "https://unreachable.invalid/custom/api/");
    }
}

//! HTTP Client Factory
//!
//! Builds the `reqwest` client shared by a provider instance.

use std::time::Duration;

use crate::types::{LlmError, LlmResult, ProviderConfig};

/// Build a `reqwest::Client` for a provider configuration.
///
/// - `proxy_url` set -> route all traffic through that proxy
/// - `proxy_url` unset -> explicitly disable proxy (`no_proxy`), ignoring env vars
pub fn build_http_client(config: &ProviderConfig) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(10));

    match config.proxy_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| LlmError::InvalidRequest {
                message: format!("invalid proxy URL {}: {}", url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    builder.build().map_err(|e| LlmError::Other {
        message: format!("failed to build HTTP client: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client_no_proxy() {
        assert!(build_http_client(&ProviderConfig::default()).is_ok());
    }

    #[test]
    fn test_build_http_client_with_proxy() {
        let config = ProviderConfig {
            proxy_url: Some("http://127.0.0.1:8080".to_string()),
            ..Default::default()
        };
        assert!(build_http_client(&config).is_ok());
    }

    #[test]
    fn test_build_http_client_rejects_bad_proxy() {
        let config = ProviderConfig {
            proxy_url: Some("::not a url::".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_http_client(&config),
            Err(LlmError::InvalidRequest { .. })
        ));
    }
}

//! Configuration resolution.
//!
//! Merges caller-supplied overrides with process-wide defaults into a
//! [`ResolvedConfig`]. The metrics section is left unset when the caller
//! supplies none — an absent section means "no metrics pipeline
//! configuration", not "default metrics pipeline".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_SERVICE_NAME: &str = "worker";
pub const DEFAULT_EXPORT_ENDPOINT: &str = "http://localhost:4318/v1/traces";
pub const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 10_000;

/// Caller-supplied overrides. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub service: ServiceOverrides,
    pub exporter: ExporterOverrides,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverrides {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterOverrides {
    pub endpoint: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

/// Metrics pipeline settings. Only present when the caller asks for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: DEFAULT_EXPORT_TIMEOUT_MS,
        }
    }
}

/// Effective settings for one process, produced by [`resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub service: ServiceConfig,
    pub exporter: ExporterConfig,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    pub endpoint: String,
    pub headers: HashMap<String, String>,
    pub timeout_ms: u64,
}

/// Merges user overrides with process-wide defaults.
pub fn resolve(user: UserConfig) -> ResolvedConfig {
    ResolvedConfig {
        service: ServiceConfig {
            name: user
                .service
                .name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            version: user.service.version,
        },
        exporter: ExporterConfig {
            endpoint: user
                .exporter
                .endpoint
                .unwrap_or_else(|| DEFAULT_EXPORT_ENDPOINT.to_string()),
            headers: user.exporter.headers,
            timeout_ms: user
                .exporter
                .timeout_ms
                .unwrap_or(DEFAULT_EXPORT_TIMEOUT_MS),
        },
        metrics: user.metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_when_nothing_supplied() {
        let resolved = resolve(UserConfig::default());
        assert_eq!(resolved.service.name, DEFAULT_SERVICE_NAME);
        assert_eq!(resolved.exporter.endpoint, DEFAULT_EXPORT_ENDPOINT);
        assert_eq!(resolved.exporter.timeout_ms, DEFAULT_EXPORT_TIMEOUT_MS);
        assert!(resolved.metrics.is_none());
    }

    #[test]
    fn user_overrides_win() {
        let user = UserConfig {
            service: ServiceOverrides {
                name: Some("checkout".to_string()),
                version: Some("1.4.2".to_string()),
            },
            exporter: ExporterOverrides {
                endpoint: Some("https://collector.internal:4318".to_string()),
                headers: HashMap::from([(
                    "x-api-key".to_string(),
                    "k".to_string(),
                )]),
                timeout_ms: Some(2_500),
            },
            metrics: None,
        };

        let resolved = resolve(user);
        assert_eq!(resolved.service.name, "checkout");
        assert_eq!(resolved.service.version.as_deref(), Some("1.4.2"));
        assert_eq!(resolved.exporter.endpoint, "https://collector.internal:4318");
        assert_eq!(resolved.exporter.headers.get("x-api-key").unwrap(), "k");
        assert_eq!(resolved.exporter.timeout_ms, 2_500);
    }

    #[test]
    fn metrics_section_is_preserved_only_when_supplied() {
        let without = resolve(UserConfig::default());
        assert!(without.metrics.is_none());

        let with = resolve(UserConfig {
            metrics: Some(MetricsConfig::default()),
            ..Default::default()
        });
        assert_eq!(with.metrics, Some(MetricsConfig::default()));
    }

    #[test]
    fn user_config_deserializes_from_partial_json() {
        let user: UserConfig =
            serde_json::from_str(r#"{"service": {"name": "edge"}}"#).unwrap();
        let resolved = resolve(user);
        assert_eq!(resolved.service.name, "edge");
        assert_eq!(resolved.exporter.endpoint, DEFAULT_EXPORT_ENDPOINT);
        assert!(resolved.metrics.is_none());
    }
}

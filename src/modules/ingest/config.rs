// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{
    modules::error::{code::ErrorCode, RollupResult},
    raise_error,
};

/// Site map of the reverse proxy in front of the hosted contents.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReverseProxyConfig {
    pub fqdn: String,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SiteConfig {
    /// Static file site, only its home page is tracked.
    Files { subdomain: String, title: String },
    /// Zim reader serving several zims under `/content/<zim>/`; maps zim name to title.
    Zim {
        subdomain: String,
        zims: BTreeMap<String, String>,
    },
}

impl SiteConfig {
    pub fn subdomain(&self) -> &str {
        match self {
            SiteConfig::Files { subdomain, .. } | SiteConfig::Zim { subdomain, .. } => subdomain,
        }
    }
}

impl ReverseProxyConfig {
    pub fn parse(json: &str) -> RollupResult<Self> {
        let config: ReverseProxyConfig = serde_json::from_str(json).map_err(|e| {
            raise_error!(
                format!("Invalid reverse proxy config: {}", e),
                ErrorCode::InvalidParameter
            )
        })?;
        if config.fqdn.trim().is_empty() {
            return Err(raise_error!(
                "Reverse proxy config 'fqdn' cannot be empty".into(),
                ErrorCode::InvalidParameter
            ));
        }
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> RollupResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            raise_error!(
                format!("Failed to read reverse proxy config {:?}: {}", path, e),
                ErrorCode::MissingConfiguration
            )
        })?;
        Self::parse(&json)
    }

    /// Looks up the site answering on `host`, ignoring case and any port suffix.
    pub fn site_for_host(&self, host: &str) -> Option<&SiteConfig> {
        let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
        let subdomain = host.strip_suffix(&format!(".{}", self.fqdn.to_ascii_lowercase()))?;
        self.sites
            .iter()
            .find(|site| site.subdomain().eq_ignore_ascii_case(subdomain))
    }
}

#[cfg(test)]
pub(crate) fn sample_config() -> ReverseProxyConfig {
    ReverseProxyConfig::parse(
        r#"{
            "fqdn": "renaud.test",
            "sites": [
                {"kind": "files", "subdomain": "nomad", "title": "Nomad exercices du CP à la 3è"},
                {"kind": "zim", "subdomain": "kiwix", "zims": {"wikipedia_en_all": "Wikipedia"}}
            ]
        }"#,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_lookup_by_host() {
        let config = sample_config();
        assert!(matches!(
            config.site_for_host("nomad.renaud.test"),
            Some(SiteConfig::Files { .. })
        ));
        assert!(matches!(
            config.site_for_host("KIWIX.renaud.test:443"),
            Some(SiteConfig::Zim { .. })
        ));
        assert!(config.site_for_host("renaud.test").is_none());
        assert!(config.site_for_host("nomad.other.test").is_none());
    }

    #[test]
    fn test_empty_fqdn_is_rejected() {
        let err = ReverseProxyConfig::parse(r#"{"fqdn": " ", "sites": []}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }

    #[test]
    fn test_unknown_site_kind_is_rejected() {
        let json = r#"{"fqdn": "a.test", "sites": [{"kind": "ftp", "subdomain": "x"}]}"#;
        assert!(ReverseProxyConfig::parse(json).is_err());
    }
}

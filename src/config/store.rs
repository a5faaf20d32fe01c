//! Document store configuration

use serde::Deserialize;

/// The `[store]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Firebase app name, expands to `https://<name>.firebaseio.com`
    pub app_name: Option<String>,

    /// Explicit database URL; takes precedence over `app_name`
    pub base_url: Option<String>,

    /// Credential source: inline JSON, a file path, or a raw token
    pub credential: Option<String>,
}

impl StoreConfig {
    /// Database root URL without a trailing slash
    pub fn resolve_base_url(&self) -> Option<String> {
        let url = match (&self.base_url, &self.app_name) {
            (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
            (_, Some(name)) if !name.trim().is_empty() => {
                format!("https://{}.firebaseio.com", name.trim())
            }
            _ => return None,
        };
        Some(url.trim_end_matches('/').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_name_expands() {
        let config = StoreConfig {
            app_name: Some("sensors-demo".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_base_url().as_deref(),
            Some("https://sensors-demo.firebaseio.com")
        );
    }

    #[test]
    fn test_base_url_wins_and_is_trimmed() {
        let config = StoreConfig {
            app_name: Some("ignored".to_string()),
            base_url: Some("http://127.0.0.1:9000/".to_string()),
            credential: None,
        };
        assert_eq!(
            config.resolve_base_url().as_deref(),
            Some("http://127.0.0.1:9000")
        );
    }

    #[test]
    fn test_missing_url() {
        assert_eq!(StoreConfig::default().resolve_base_url(), None);
        let blank = StoreConfig {
            app_name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.resolve_base_url(), None);
    }
}

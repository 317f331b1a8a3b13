// src/pipeline/validate.rs

use std::path::Path;

use crate::error::Result;
use crate::models::Config;
use crate::services::extractors::ExtractorRegistry;
use crate::services::proxy::ProxyPool;
use crate::utils::log;

/// Load the configuration strictly, then check values, selectors and proxies.
pub fn run_validate(config_path: &Path) -> Result<Config> {
    log::header("Validating Configuration");

    match check(config_path) {
        Ok(config) => {
            log::success(&format!("Config OK: {}", config_path.display()));
            log::sub_item(&format!("User agent: {}", config.crawler.user_agent));
            log::sub_item(&format!("Timeout: {}s", config.crawler.timeout_secs));
            log::sub_item(&format!(
                "Price window: {} - {}",
                config.crawler.min_valid_price, config.crawler.max_valid_price
            ));
            log::sub_item(&format!(
                "Sites: {} ({} active)",
                config.sites.len(),
                config.sites.iter().filter(|s| s.is_active).count()
            ));
            log::sub_item(&format!(
                "Proxies: {}",
                if config.proxy.enabled {
                    config.proxy.endpoints.len().to_string()
                } else {
                    "disabled".to_string()
                }
            ));
            log::sub_item(&format!(
                "Storefront API: {}",
                if config.sync.api.is_configured() {
                    "configured"
                } else {
                    "not configured"
                }
            ));
            Ok(config)
        }
        Err(e) => {
            log::error(&format!("Validation failed: {e}"));
            Err(e)
        }
    }
}

fn check(config_path: &Path) -> Result<Config> {
    let config = Config::load(config_path)?.with_env_overrides();
    config.validate()?;
    ExtractorRegistry::for_sites(&config.sites)?;
    ProxyPool::from_config(&config.proxy)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn accepts_minimal_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[crawler]
timeout_secs = 10

[[sites]]
name = "shop.example"
base_url = "https://shop.example"
selectors = { price = ".price" }
"#,
        )
        .unwrap();

        let config = run_validate(&path).unwrap();
        assert_eq!(config.sites.len(), 1);
        assert_eq!(config.crawler.timeout_secs, 10);
    }

    #[test]
    fn rejects_bad_selector_and_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[[sites]]
name = "shop.example"
base_url = "https://shop.example"
selectors = { price = "[[[" }
"#,
        )
        .unwrap();

        assert!(run_validate(&path).is_err());
        assert!(run_validate(&tmp.path().join("missing.toml")).is_err());
    }
}

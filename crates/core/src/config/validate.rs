use std::collections::HashSet;

use tracing::warn;

use super::types::{Config, SearchSourceRestriction};
use crate::backend::BackendState;

/// Outcome of validating a configuration. Errors make the config
/// unusable; warnings describe setups that will work but probably not
/// the way the operator intends.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.searching.timeout_secs == 0 {
        report
            .errors
            .push("searching.timeout_secs cannot be 0".to_string());
    }

    if config.backends.is_empty() {
        report
            .warnings
            .push("No backends configured. You won't get any results".to_string());
    } else {
        let mut names = HashSet::new();
        let mut duplicates = HashSet::new();
        for backend in &config.backends {
            if !names.insert(backend.name.as_str()) {
                duplicates.insert(backend.name.as_str());
            }
        }
        if !duplicates.is_empty() {
            let mut duplicates: Vec<_> = duplicates.into_iter().collect();
            duplicates.sort_unstable();
            report.errors.push(format!(
                "Duplicate backend names found: {}",
                duplicates.join(", ")
            ));
        }

        if config
            .backends
            .iter()
            .all(|b| b.state != BackendState::Enabled)
        {
            report
                .warnings
                .push("No backends enabled. Searches will return empty results".to_string());
        } else if config.backends.iter().all(|b| b.supported_ids.is_empty())
            && config.searching.generate_queries == SearchSourceRestriction::None
        {
            // A policy choice, not a correctness bug: such a setup only
            // returns empty results for id-based searches.
            report.warnings.push(
                "No backend supports search ids. Without query generation, id-based searches \
                 will return empty results"
                    .to_string(),
            );
        }
    }

    for warning in &report.warnings {
        warn!("Config validation warning: {warning}");
    }
    for error in &report.errors {
        warn!("Config validation error: {error}");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use crate::searcher::IdentifierType;

    #[test]
    fn test_validate_empty_config_warns() {
        let report = validate_config(&Config::default());
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_validate_duplicate_backend_names_is_error() {
        let mut config = Config::default();
        config.backends.push(BackendConfig::new("a", "http://a"));
        config.backends.push(BackendConfig::new("a", "http://a2"));

        let report = validate_config(&config);
        assert!(!report.is_ok());
        assert!(report.errors[0].contains("Duplicate backend names"));
    }

    #[test]
    fn test_validate_no_enabled_backends_warns() {
        let mut config = Config::default();
        let mut backend = BackendConfig::new("a", "http://a");
        backend.state = BackendState::DisabledByUser;
        config.backends.push(backend);

        let report = validate_config(&config);
        assert!(report.is_ok());
        assert!(report.warnings[0].contains("No backends enabled"));
    }

    #[test]
    fn test_validate_no_id_support_without_generation_is_warning_not_error() {
        let mut config = Config::default();
        config.searching.generate_queries = SearchSourceRestriction::None;
        config.backends.push(BackendConfig::new("a", "http://a"));

        let report = validate_config(&config);
        assert!(report.is_ok());
        assert!(report.warnings[0].contains("query generation"));
    }

    #[test]
    fn test_validate_id_support_present_no_warning() {
        let mut config = Config::default();
        config.searching.generate_queries = SearchSourceRestriction::None;
        let mut backend = BackendConfig::new("a", "http://a");
        backend.supported_ids = vec![IdentifierType::Tvdb];
        config.backends.push(backend);

        let report = validate_config(&config);
        assert!(report.is_ok());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_validate_zero_timeout_is_error() {
        let mut config = Config::default();
        config.searching.timeout_secs = 0;
        let report = validate_config(&config);
        assert!(!report.is_ok());
    }
}

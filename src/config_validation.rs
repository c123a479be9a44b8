//! Start-up validation of the proxy configuration.
//!
//! Errors stop the server from starting. Warnings and suggestions are logged
//! and otherwise ignored.

use crate::config::Config;
use crate::html::container_id;
use url::Url;

/// Validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
            suggestions: vec![],
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_suggestion(&mut self, suggestion: String) {
        self.suggestions.push(suggestion);
    }
}

pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::success();

    validate_endpoints(config, &mut result);
    validate_upstream_limits(config, &mut result);
    validate_tls(config, &mut result);
    validate_scoping(config, &mut result);
    validate_public_origin(config, &mut result);

    result
}

fn validate_endpoints(config: &Config, result: &mut ValidationResult) {
    for (name, path) in [("proxy_path", &config.proxy_path), ("resource_path", &config.resource_path)] {
        if !path.starts_with('/') {
            result.add_error(format!("{} must start with '/', got '{}'", name, path));
        }
        if path.contains('?') || path.contains('#') {
            result.add_error(format!("{} must be a bare path, got '{}'", name, path));
        }
    }
    if config.proxy_path == config.resource_path {
        result.add_error(format!(
            "proxy_path and resource_path must differ (both are '{}')",
            config.proxy_path
        ));
    }
}

fn validate_upstream_limits(config: &Config, result: &mut ValidationResult) {
    if !(1..=100).contains(&config.max_redirects) {
        result.add_error(format!(
            "max_redirects must be between 1 and 100, got {}",
            config.max_redirects
        ));
    } else if !(20..=25).contains(&config.max_redirects) {
        result.add_warning(format!(
            "max_redirects of {} is outside the usual 20-25 range browsers allow",
            config.max_redirects
        ));
    }

    if config.connect_timeout_secs == 0 {
        result.add_error("connect_timeout_secs must be greater than 0".to_string());
    }
    if config.request_timeout_secs == 0 {
        result.add_error("request_timeout_secs must be greater than 0".to_string());
    } else if !(15..=30).contains(&config.request_timeout_secs) {
        result.add_warning(format!(
            "request_timeout_secs of {} is outside the typical 15-30s range",
            config.request_timeout_secs
        ));
    }
    if config.connect_timeout_secs > config.request_timeout_secs && config.request_timeout_secs > 0 {
        result.add_suggestion(
            "connect_timeout_secs exceeds request_timeout_secs; the request timeout will fire first".to_string(),
        );
    }

    if config.max_body_bytes == 0 {
        result.add_error("max_body_bytes must be greater than 0".to_string());
    } else if config.max_body_bytes < 1024 * 1024 {
        result.add_warning(format!(
            "max_body_bytes of {} will reject many ordinary pages",
            config.max_body_bytes
        ));
    }
}

fn validate_tls(config: &Config, result: &mut ValidationResult) {
    match (&config.private_key, &config.certificate) {
        (Some(_), None) => result.add_error("private_key is set but certificate is missing".to_string()),
        (None, Some(_)) => result.add_error("certificate is set but private_key is missing".to_string()),
        _ => {}
    }
}

fn validate_scoping(config: &Config, result: &mut ValidationResult) {
    let selector = config.scope_selector.trim();
    if selector.is_empty() {
        result.add_error("scope_selector must not be empty".to_string());
        return;
    }
    if config.scope_css && container_id(selector).is_none() {
        result.add_warning(format!(
            "scope_selector '{}' is not an #id selector; documents will not be wrapped in a container",
            selector
        ));
        result.add_suggestion("Use an id selector such as '#proxy-root' for scope_selector".to_string());
    }
}

fn validate_public_origin(config: &Config, result: &mut ValidationResult) {
    let Some(origin) = &config.public_origin else {
        return;
    };
    match Url::parse(origin) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            if url.path() != "/" || url.query().is_some() {
                result.add_warning(format!(
                    "public_origin '{}' carries a path or query that will be ignored",
                    origin
                ));
            }
        }
        Ok(url) => result.add_error(format!(
            "public_origin must use http or https, got '{}'",
            url.scheme()
        )),
        Err(e) => result.add_error(format!("public_origin '{}' is not a valid URL: {}", origin, e)),
    }
}

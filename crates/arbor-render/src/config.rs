#![forbid(unsafe_code)]

//! Render configuration.
//!
//! Built with chained `with_*` calls or read from the environment:
//!
//! | Variable               | Effect                                         |
//! |------------------------|------------------------------------------------|
//! | `ARBOR_LEAK_THRESHOLD` | callback count at which node tokens warn       |
//! | `ARBOR_STRICT_KINDS`   | `1`/`true` rejects kinds missing from registry |
//!
//! Unparseable values are logged and ignored.

use std::env;

use arbor_core::cancellation::DEFAULT_WARN_THRESHOLD;

use crate::registry::ElementRegistry;

pub const ENV_LEAK_THRESHOLD: &str = "ARBOR_LEAK_THRESHOLD";
pub const ENV_STRICT_KINDS: &str = "ARBOR_STRICT_KINDS";

/// Settings shared by every node of a [`RenderContext`](crate::RenderContext).
#[derive(Debug, Clone)]
pub struct RenderConfig {
    leak_threshold: usize,
    strict_kinds: bool,
    registry: ElementRegistry,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            leak_threshold: DEFAULT_WARN_THRESHOLD,
            strict_kinds: false,
            registry: ElementRegistry::with_html_tags(),
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `ARBOR_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_LEAK_THRESHOLD) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.leak_threshold = n,
                _ => tracing::warn!(
                    var = ENV_LEAK_THRESHOLD,
                    value = %raw,
                    "ignoring invalid leak threshold"
                ),
            }
        }
        if let Some(raw) = lookup(ENV_STRICT_KINDS) {
            match parse_flag(&raw) {
                Some(flag) => config.strict_kinds = flag,
                None => tracing::warn!(
                    var = ENV_STRICT_KINDS,
                    value = %raw,
                    "ignoring invalid strict-kinds flag"
                ),
            }
        }
        config
    }

    /// Callback count at which a node's cancellation token logs a leak warning.
    #[must_use]
    pub fn with_leak_threshold(mut self, threshold: usize) -> Self {
        self.leak_threshold = threshold.max(1);
        self
    }

    /// Reject kind names the registry does not know.
    #[must_use]
    pub fn with_strict_kinds(mut self, strict: bool) -> Self {
        self.strict_kinds = strict;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ElementRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn leak_threshold(&self) -> usize {
        self.leak_threshold
    }

    #[must_use]
    pub fn strict_kinds(&self) -> bool {
        self.strict_kinds
    }

    #[must_use]
    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ElementRegistry {
        &mut self.registry
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.leak_threshold(), DEFAULT_WARN_THRESHOLD);
        assert!(!config.strict_kinds());
        assert!(config.registry().contains("div"));
    }

    #[test]
    fn builder_overrides() {
        let config = RenderConfig::new()
            .with_leak_threshold(0)
            .with_strict_kinds(true)
            .with_registry(ElementRegistry::new());
        assert_eq!(config.leak_threshold(), 1);
        assert!(config.strict_kinds());
        assert!(config.registry().is_empty());
    }

    #[test]
    fn lookup_reads_variables() {
        let config = RenderConfig::from_lookup(lookup(&[
            (ENV_LEAK_THRESHOLD, " 64 "),
            (ENV_STRICT_KINDS, "TRUE"),
        ]));
        assert_eq!(config.leak_threshold(), 64);
        assert!(config.strict_kinds());
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = RenderConfig::from_lookup(lookup(&[
            (ENV_LEAK_THRESHOLD, "lots"),
            (ENV_STRICT_KINDS, "maybe"),
        ]));
        assert_eq!(config.leak_threshold(), DEFAULT_WARN_THRESHOLD);
        assert!(!config.strict_kinds());

        let zero = RenderConfig::from_lookup(lookup(&[(ENV_LEAK_THRESHOLD, "0")]));
        assert_eq!(zero.leak_threshold(), DEFAULT_WARN_THRESHOLD);
    }
}

use crate::core::config::data::Config;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_ENDPOINT_TIMEOUT_SECONDS: u64 = 30;

/// Deadlines applied by the engine. Every request gets `request` unless its
/// method has an entry in `per_method`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub request: Duration,
    /// How long `connect` waits for the event stream to answer and announce
    /// its write endpoint.
    pub endpoint: Duration,
    pub per_method: HashMap<String, Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            endpoint: Duration::from_secs(DEFAULT_ENDPOINT_TIMEOUT_SECONDS),
            per_method: HashMap::new(),
        }
    }
}

impl TimeoutPolicy {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let policy = Self {
            request: config
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request),
            endpoint: config
                .endpoint_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.endpoint),
            per_method: HashMap::new(),
        };
        config
            .method_timeouts
            .iter()
            .fold(policy, |policy, (method, secs)| {
                policy.with_method(method.as_str(), Duration::from_secs(*secs))
            })
    }

    pub fn for_method(&self, method: &str) -> Duration {
        self.per_method
            .get(method)
            .copied()
            .unwrap_or(self.request)
    }

    pub fn with_method(mut self, method: impl Into<String>, timeout: Duration) -> Self {
        self.per_method.insert(method.into(), timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_method_override_wins() {
        let policy = TimeoutPolicy::default().with_method("tools/call", Duration::from_secs(300));
        assert_eq!(policy.for_method("tools/call"), Duration::from_secs(300));
        assert_eq!(policy.for_method("tools/list"), Duration::from_secs(30));
    }

    #[test]
    fn config_values_override_defaults() {
        let config = Config {
            request_timeout_secs: Some(5),
            method_timeouts: HashMap::from([("tools/call".to_string(), 120)]),
            ..Config::default()
        };
        let policy = TimeoutPolicy::from_config(&config);
        assert_eq!(policy.request, Duration::from_secs(5));
        assert_eq!(policy.endpoint, Duration::from_secs(30));
        assert_eq!(policy.for_method("tools/call"), Duration::from_secs(120));
    }
}

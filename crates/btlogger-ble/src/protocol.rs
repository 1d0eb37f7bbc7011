//! Producer recognition
//!
//! A producer is recognised either by the log service it advertises or, for
//! firmware that does not put the service in its advertisement, by a
//! fragment of its advertised name.

use btlogger_core::LinkConfig;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Device Filter
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeviceFilter {
    service_uuid: Uuid,
    allow_patterns: Vec<String>,
}

impl DeviceFilter {
    pub fn new(service_uuid: Uuid, allow_patterns: Vec<String>) -> Self {
        Self {
            service_uuid,
            allow_patterns,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.service_uuid, config.allow_patterns.clone())
    }

    /// Whether an advertisement belongs to a log producer
    pub fn matches(&self, name: &str, services: &[Uuid]) -> bool {
        if services.contains(&self.service_uuid) {
            return true;
        }
        !name.is_empty()
            && self
                .allow_patterns
                .iter()
                .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btlogger_core::config::DEFAULT_SERVICE_UUID;

    fn filter() -> DeviceFilter {
        DeviceFilter::from_config(&LinkConfig::default())
    }

    #[test]
    fn test_service_match() {
        assert!(filter().matches("", &[DEFAULT_SERVICE_UUID]));
        assert!(!filter().matches("", &[Uuid::nil()]));
    }

    #[test]
    fn test_name_patterns() {
        let filter = filter();
        assert!(filter.matches("Sensor_v1", &[]));
        assert!(filter.matches("ESP32-Kitchen", &[]));
        assert!(filter.matches("BTLogger", &[]));
        assert!(!filter.matches("Headphones", &[]));
        assert!(!filter.matches("", &[]));
    }

    #[test]
    fn test_custom_patterns() {
        let filter = DeviceFilter::new(Uuid::nil(), vec!["Probe".to_string()]);
        assert!(filter.matches("ProbeA", &[]));
        assert!(!filter.matches("Sensor_v1", &[]));
    }
}

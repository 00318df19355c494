//! Static service registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServiceEntry;

/// Immutable description of one supported service.
///
/// Built once at startup from configuration and never mutated.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    /// Service identifier (the `service` value clients send).
    pub service_id: String,
    /// Port the service listens on inside its instance.
    pub internal_port: u16,
    /// Image to launch.
    pub image: String,
    /// Host half of the externally visible URL.
    pub host: String,
    /// Login endpoint path.
    pub login_path: String,
    /// Health-check endpoint path.
    pub health_check_path: String,
    /// First host port assigned to this service.
    pub first_host_port: u16,
}

impl ServiceDescriptor {
    fn from_entry(service_id: &str, entry: &ServiceEntry) -> Self {
        Self {
            service_id: service_id.to_string(),
            internal_port: entry.internal_port,
            image: entry.image.clone(),
            host: entry.host.clone(),
            login_path: entry.login_path.clone(),
            health_check_path: entry.health_check_path.clone(),
            first_host_port: entry.first_host_port,
        }
    }

    /// Externally visible base URL for an instance on `host_port`.
    pub fn base_url(&self, host_port: u16) -> String {
        format!("{}:{}", self.host, host_port)
    }

    /// Login URL for an instance on `host_port`.
    pub fn login_url(&self, host_port: u16) -> String {
        format!("{}{}", self.base_url(host_port), self.login_path)
    }

    /// Health-check URL for an instance on `host_port`.
    pub fn health_check_url(&self, host_port: u16) -> String {
        format!("{}{}", self.base_url(host_port), self.health_check_path)
    }
}

/// Lookup table from service ID to descriptor.
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: HashMap<String, Arc<ServiceDescriptor>>,
}

impl ServiceCatalog {
    /// Build the catalog from configured service entries.
    pub fn from_entries(entries: &HashMap<String, ServiceEntry>) -> Self {
        let services = entries
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::new(ServiceDescriptor::from_entry(id, entry))))
            .collect();
        Self { services }
    }

    /// Look up a service by ID.
    pub fn get(&self, service_id: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services.get(service_id).cloned()
    }

    /// All registered descriptors.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.services.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> ServiceCatalog {
        let entries = HashMap::from([(
            "course_manager".to_string(),
            ServiceEntry {
                image: "course_manager_test".to_string(),
                ..Default::default()
            },
        )]);
        ServiceCatalog::from_entries(&entries)
    }

    #[test]
    fn test_lookup() {
        let catalog = test_catalog();
        let descriptor = catalog.get("course_manager").unwrap();
        assert_eq!(descriptor.image, "course_manager_test");
        assert_eq!(descriptor.internal_port, 5000);
        assert!(catalog.get("does_not_exist").is_none());
    }

    #[test]
    fn test_url_construction() {
        let catalog = test_catalog();
        let descriptor = catalog.get("course_manager").unwrap();
        assert_eq!(descriptor.base_url(8000), "http://127.0.0.1:8000");
        assert_eq!(descriptor.login_url(8000), "http://127.0.0.1:8000/api/login");
        assert_eq!(
            descriptor.health_check_url(8001),
            "http://127.0.0.1:8001/api/health_check"
        );
    }
}

//! Exclusive host-port allocation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::catalog::ServiceCatalog;

/// Per-service host-port counters.
///
/// Each counter starts at the descriptor's `first_host_port` and only ever
/// counts up; ports are never recycled or reset for the life of the
/// process. The mutex is held for the read-increment only, never across a
/// launch, so allocation does not block on instance startup. The counter
/// wraps at the `u16` limit; port exhaustion is an accepted limitation.
#[derive(Debug)]
pub struct PortAllocator {
    counters: HashMap<String, Mutex<u16>>,
}

impl PortAllocator {
    /// Build one counter per catalog service.
    pub fn from_catalog(catalog: &ServiceCatalog) -> Self {
        let counters = catalog
            .descriptors()
            .map(|d| (d.service_id.clone(), Mutex::new(d.first_host_port)))
            .collect();
        Self { counters }
    }

    /// Allocate the next host port for `service_id`.
    ///
    /// Returns `None` for a service the allocator was not built with.
    /// Concurrent calls for the same service always receive distinct,
    /// consecutive ports.
    pub fn allocate(&self, service_id: &str) -> Option<u16> {
        let counter = self.counters.get(service_id)?;
        let mut next = counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let port = *next;
        *next = next.wrapping_add(1);
        Some(port)
    }
}

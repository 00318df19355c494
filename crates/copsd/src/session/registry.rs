//! Shared session and instance registries.

use dashmap::{DashMap, DashSet};

use super::{InstanceStatus, RunningInstance, Session, SessionKey};

/// Tracks which users hold an active session per service.
///
/// Reservation is a single atomic insert, so a concurrent request for the
/// same (service, user) pair can never slip between a membership check and
/// an append. Safe for concurrent use from request handlers, monitors and
/// the shutdown coordinator.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: DashSet<SessionKey>,
    sessions: DashMap<SessionKey, Session>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically reserve the slot for `key`.
    ///
    /// Returns `false` when the user already holds a session for the
    /// service; the caller must then abandon the request with a conflict.
    pub fn try_reserve(&self, key: &SessionKey) -> bool {
        self.active.insert(key.clone())
    }

    /// Release the slot for `key` and drop its session record.
    ///
    /// Idempotent: releasing an absent entry is a no-op, since a monitor's
    /// teardown may race a shutdown sweep.
    pub fn release(&self, key: &SessionKey) {
        self.active.remove(key);
        self.sessions.remove(key);
    }

    /// Attach the established session record to its reserved slot.
    pub fn attach(&self, session: Session) {
        self.sessions.insert(session.key(), session);
    }

    /// Whether `key` currently holds a slot.
    pub fn is_active(&self, key: &SessionKey) -> bool {
        self.active.contains(key)
    }

    /// Usernames with an active session for `service_id`.
    pub fn active_users(&self, service_id: &str) -> Vec<String> {
        self.active
            .iter()
            .filter(|key| key.service_id == service_id)
            .map(|key| key.username.clone())
            .collect()
    }

    /// The session record for `key`, if established.
    pub fn session(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.get(key).map(|s| s.value().clone())
    }
}

/// Process-wide set of launched instances.
///
/// Entries transition starting -> running -> stopped and are kept after
/// stopping; the engine prune removes the underlying containers.
#[derive(Debug, Default)]
pub struct InstanceSet {
    instances: DashMap<String, RunningInstance>,
}

impl InstanceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly launched instance.
    pub fn register(&self, instance: RunningInstance) {
        self.instances.insert(instance.id.clone(), instance);
    }

    /// Update the status of `id`; unknown IDs are ignored.
    pub fn set_status(&self, id: &str, status: InstanceStatus) {
        if let Some(mut instance) = self.instances.get_mut(id) {
            instance.status = status;
        }
    }

    /// Record the observed network address of `id`.
    pub fn set_address(&self, id: &str, address: &str) {
        if let Some(mut instance) = self.instances.get_mut(id) {
            instance.address = address.to_string();
        }
    }

    /// The tracked record for `id`.
    pub fn get(&self, id: &str) -> Option<RunningInstance> {
        self.instances.get(id).map(|i| i.value().clone())
    }

    /// Snapshot of all instances not already stopped.
    pub fn snapshot_active(&self) -> Vec<RunningInstance> {
        self.instances
            .iter()
            .filter(|i| i.status != InstanceStatus::Stopped)
            .map(|i| i.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_instance(id: &str) -> RunningInstance {
        RunningInstance {
            id: id.to_string(),
            name: format!("course_manager-{}", id),
            host_port: 8000,
            address: "172.17.0.2".to_string(),
            status: InstanceStatus::Starting,
        }
    }

    #[test]
    fn test_reserve_then_conflict() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("course_manager", "student");

        assert!(registry.try_reserve(&key));
        assert!(!registry.try_reserve(&key));
        assert!(registry.is_active(&key));

        registry.release(&key);
        assert!(!registry.is_active(&key));
        assert!(registry.try_reserve(&key));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("course_manager", "student");

        assert!(registry.try_reserve(&key));
        registry.release(&key);
        // Second release of an absent entry must be a silent no-op.
        registry.release(&key);
        assert!(!registry.is_active(&key));
    }

    #[test]
    fn test_reservations_are_scoped_per_service() {
        let registry = SessionRegistry::new();
        assert!(registry.try_reserve(&SessionKey::new("course_manager", "student")));
        assert!(registry.try_reserve(&SessionKey::new("grade_book", "student")));
        assert!(registry.try_reserve(&SessionKey::new("course_manager", "instructor")));

        let mut users = registry.active_users("course_manager");
        users.sort();
        assert_eq!(users, vec!["instructor", "student"]);
    }

    #[test]
    fn test_attach_and_release_session_record() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("course_manager", "student");
        assert!(registry.try_reserve(&key));

        registry.attach(Session {
            username: "student".to_string(),
            service_id: "course_manager".to_string(),
            instance: test_instance("abc"),
            token: "cookie".to_string(),
            started_at: Utc::now(),
        });
        assert!(registry.session(&key).is_some());

        registry.release(&key);
        assert!(registry.session(&key).is_none());
    }

    #[test]
    fn test_instance_set_transitions() {
        let set = InstanceSet::new();
        set.register(test_instance("abc"));

        set.set_status("abc", InstanceStatus::Running);
        assert_eq!(set.get("abc").unwrap().status, InstanceStatus::Running);
        assert_eq!(set.snapshot_active().len(), 1);

        set.set_status("abc", InstanceStatus::Stopped);
        assert!(set.snapshot_active().is_empty());
        // Stopped entries are retained for inspection.
        assert!(set.get("abc").is_some());

        // Unknown IDs are ignored.
        set.set_status("nope", InstanceStatus::Stopped);
    }
}

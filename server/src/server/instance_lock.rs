// world_map_core/server/src/server/instance_lock.rs
use crate::core::types::{InstanceId, LockOwner, MapId, MapRequester, ObjectGuid};
use dashmap::DashMap;
use tracing::debug;

/// Binding of a party to one instance of a lock-bound map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceLock {
    pub owner: LockOwner,
    pub map_id: MapId,
    pub instance_id: InstanceId,
}

/// Where instance locks live. Implemented by the persistence side of the
/// server; `InMemoryInstanceLocks` covers tests and the standalone binary.
pub trait InstanceLockStore: Send + Sync {
    fn find_lock(&self, owner: LockOwner, map_id: MapId) -> Option<InstanceLock>;

    fn create_lock(&self, owner: LockOwner, map_id: MapId, instance_id: InstanceId) -> InstanceLock;

    /// Points an existing lock at a new instance id.
    fn rebind_lock(&self, owner: LockOwner, map_id: MapId, instance_id: InstanceId) -> InstanceLock;

    /// Whether any lock still references the instance.
    fn is_instance_referenced(&self, map_id: MapId, instance_id: InstanceId) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryInstanceLocks {
    locks: DashMap<(LockOwner, MapId), InstanceId>,
}

impl InMemoryInstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl InstanceLockStore for InMemoryInstanceLocks {
    fn find_lock(&self, owner: LockOwner, map_id: MapId) -> Option<InstanceLock> {
        self.locks
            .get(&(owner, map_id))
            .map(|entry| InstanceLock { owner, map_id, instance_id: *entry.value() })
    }

    fn create_lock(&self, owner: LockOwner, map_id: MapId, instance_id: InstanceId) -> InstanceLock {
        self.locks.insert((owner, map_id), instance_id);
        debug!("Created instance lock {:?} -> {:03}:{}", owner, map_id, instance_id);
        InstanceLock { owner, map_id, instance_id }
    }

    fn rebind_lock(&self, owner: LockOwner, map_id: MapId, instance_id: InstanceId) -> InstanceLock {
        let previous = self.locks.insert((owner, map_id), instance_id);
        debug!("Rebound instance lock {:?} on map {:03}: {:?} -> {}", owner, map_id, previous, instance_id);
        InstanceLock { owner, map_id, instance_id }
    }

    fn is_instance_referenced(&self, map_id: MapId, instance_id: InstanceId) -> bool {
        self.locks
            .iter()
            .any(|entry| entry.key().1 == map_id && *entry.value() == instance_id)
    }
}

/// Decides whether a party with no lock on a non lock-bound dungeon joins a
/// live copy instead of getting a new one.
pub trait InstanceReusePolicy: Send + Sync {
    fn reusable_instance(&self, requester: &MapRequester, map_id: MapId) -> Option<InstanceId>;

    fn record_instance(&self, requester: &MapRequester, map_id: MapId, instance_id: InstanceId);

    fn forget_instance(&self, map_id: MapId, instance_id: InstanceId);
}

/// Every request gets a fresh instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverReuse;

impl InstanceReusePolicy for NeverReuse {
    fn reusable_instance(&self, _requester: &MapRequester, _map_id: MapId) -> Option<InstanceId> {
        None
    }

    fn record_instance(&self, _requester: &MapRequester, _map_id: MapId, _instance_id: InstanceId) {}

    fn forget_instance(&self, _map_id: MapId, _instance_id: InstanceId) {}
}

/// Remembers the last instance each player entered on a map. A group forming
/// around that player is sent into the same copy while it lives.
#[derive(Debug, Default)]
pub struct RecentInstancePolicy {
    recent: DashMap<(ObjectGuid, MapId), InstanceId>,
}

impl RecentInstancePolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstanceReusePolicy for RecentInstancePolicy {
    fn reusable_instance(&self, requester: &MapRequester, map_id: MapId) -> Option<InstanceId> {
        self.recent.get(&(requester.player_guid, map_id)).map(|entry| *entry.value())
    }

    fn record_instance(&self, requester: &MapRequester, map_id: MapId, instance_id: InstanceId) {
        self.recent.insert((requester.player_guid, map_id), instance_id);
    }

    fn forget_instance(&self, map_id: MapId, instance_id: InstanceId) {
        self.recent
            .retain(|(_, recent_map), recent_id| !(*recent_map == map_id && *recent_id == instance_id));
    }
}

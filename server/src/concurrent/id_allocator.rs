// world_map_core/server/src/concurrent/id_allocator.rs
use crate::core::constants::INSTANCE_ID_CEILING;
use crate::core::error::{WorldError, WorldResult};
use crate::core::types::InstanceId;
use bit_vec::BitVec;
use tracing::{debug, warn};

/// Presence bitmap of instance ids. A set bit means the id is free.
///
/// Index 0 is never handed out. `next_id` always points at the lowest free
/// index, so freed ids are reused before the bitmap grows.
#[derive(Debug)]
pub struct InstanceIdAllocator {
    free_ids: BitVec,
    next_id: InstanceId,
    ceiling: InstanceId,
}

impl InstanceIdAllocator {
    pub fn new() -> Self {
        Self::with_ceiling(INSTANCE_ID_CEILING)
    }

    /// Allocator that reports exhaustion once `ceiling` would be handed out.
    pub fn with_ceiling(ceiling: InstanceId) -> Self {
        let mut allocator = InstanceIdAllocator {
            free_ids: BitVec::new(),
            next_id: 1,
            ceiling,
        };
        allocator.init(0);
        allocator
    }

    /// Resets the bitmap so that ids up to `max_existing_id` are addressable.
    pub fn init(&mut self, max_existing_id: InstanceId) {
        // one extra slot so that `next_id` is always a valid index
        self.free_ids = BitVec::from_elem(max_existing_id as usize + 2, true);
        self.free_ids.set(0, false);
        self.next_id = 1;
    }

    /// Marks an id restored from persistent state as in use.
    pub fn register(&mut self, instance_id: InstanceId) {
        if instance_id == 0 {
            warn!("Refusing to register reserved instance id 0");
            return;
        }
        self.ensure_index(instance_id as usize + 1);
        self.free_ids.set(instance_id as usize, false);
        if self.next_id == instance_id {
            self.next_id = self.advance_from(instance_id as usize + 1);
        }
    }

    pub fn generate(&mut self) -> WorldResult<InstanceId> {
        if self.next_id >= self.ceiling {
            return Err(WorldError::InstanceIdsExhausted);
        }
        let new_id = self.next_id;
        self.free_ids.set(new_id as usize, false);
        self.next_id = self.advance_from(new_id as usize + 1);
        debug!("Generated instance id {} (next free {})", new_id, self.next_id);
        Ok(new_id)
    }

    pub fn free(&mut self, instance_id: InstanceId) {
        if instance_id == 0 || instance_id as usize >= self.free_ids.len() {
            warn!("Ignoring free of instance id {} that was never generated", instance_id);
            return;
        }
        self.free_ids.set(instance_id as usize, true);
        self.next_id = self.next_id.min(instance_id);
    }

    pub fn is_in_use(&self, instance_id: InstanceId) -> bool {
        instance_id != 0 && self.free_ids.get(instance_id as usize) == Some(false)
    }

    pub fn in_use_count(&self) -> usize {
        // index 0 is reserved and stored as used
        self.free_ids.iter().filter(|free| !free).count().saturating_sub(1)
    }

    pub fn next_id(&self) -> InstanceId {
        self.next_id
    }

    fn ensure_index(&mut self, index: usize) {
        if index >= self.free_ids.len() {
            let missing = index + 1 - self.free_ids.len();
            self.free_ids.grow(missing, true);
        }
    }

    fn advance_from(&mut self, start: usize) -> InstanceId {
        let found = (start..self.free_ids.len()).find(|&idx| self.free_ids.get(idx) == Some(true));
        match found {
            Some(idx) => idx as InstanceId,
            None => {
                let idx = self.free_ids.len();
                self.free_ids.push(true);
                idx as InstanceId
            }
        }
    }
}

impl Default for InstanceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

//! Arena-backed device index.
//!
//! Devices live forever once created; the arena position is the stable
//! [DeviceId]. A small hash table over the originating description node
//! makes node-to-device lookup cheap during probing.

use alloc::{sync::Arc, vec::Vec};
use lazy_static::lazy_static;
use spin::RwLock;

use crate::dev::{Device, DeviceId};

const BUCKETS_LOG2: u32 = 7;
const BUCKETS: usize = 1 << BUCKETS_LOG2;

// Multiplicative scramble of the node id into a bucket.
fn bucket_of(node: usize) -> usize {
    ((node as u32).wrapping_mul(0x61C8_8647) >> (32 - BUCKETS_LOG2)) as usize
}

pub struct DeviceIndex {
    arena: Vec<Arc<Device>>,
    buckets: Vec<Vec<DeviceId>>,
}

impl DeviceIndex {
    pub fn new() -> DeviceIndex {
        let mut buckets = Vec::with_capacity(BUCKETS);
        buckets.resize_with(BUCKETS, Vec::new);
        DeviceIndex {
            arena: Vec::new(),
            buckets,
        }
    }

    pub fn insert(&mut self, mut dev: Device) -> Arc<Device> {
        dev.id = self.arena.len();
        let dev = Arc::new(dev);
        self.buckets[bucket_of(dev.node)].push(dev.id);
        self.arena.push(dev.clone());
        dev
    }

    pub fn get(&self, id: DeviceId) -> Arc<Device> {
        self.arena[id].clone()
    }

    pub fn lookup_node(&self, node: usize) -> Option<Arc<Device>> {
        self.buckets[bucket_of(node)]
            .iter()
            .map(|id| &self.arena[*id])
            .find(|dev| dev.node == node)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Every device, in bucket order.
    pub fn all(&self) -> Vec<Arc<Device>> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|id| self.arena[*id].clone()))
            .collect()
    }
}

lazy_static! {
    static ref INDEX: RwLock<DeviceIndex> = RwLock::new(DeviceIndex::new());
}

pub fn insert(dev: Device) -> Arc<Device> {
    INDEX.write().insert(dev)
}

pub fn get(id: DeviceId) -> Arc<Device> {
    INDEX.read().get(id)
}

pub fn lookup_node(node: usize) -> Option<Arc<Device>> {
    INDEX.read().lookup_node(node)
}

pub fn all() -> Vec<Arc<Device>> {
    INDEX.read().all()
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    *INDEX.write() = DeviceIndex::new();
}

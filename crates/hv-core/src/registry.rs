//! Fixed-capacity worker table with conflict-free resource allocation.
//!
//! The registry has no synchronization of its own. The daemon owns it
//! inside its supervisor and only touches it while holding the command
//! lock, so every method here takes `&self` / `&mut self` directly.
//!
//! # Allocation policy
//!
//! ```text
//! explicit value  ──▶ checked against every active slot
//!                     (exact match for the listen port, block overlap otherwise)
//! omitted value   ──▶ max(active values of that kind) + increment
//!                     or the kind's base when nothing is active
//! ```
//!
//! The MAC base is special: the very first worker gets block 0. Once block 0
//! is held by an active worker, the next default is `step` rather than
//! `0 + step` computed from a non-zero maximum, so an all-zero maximum still
//! moves past the zero block.
//!
//! Allocation is two-phase. `allocate` only reads the table and returns an
//! `Allocation`; `occupy` commits it once the worker process exists. A
//! failed spawn therefore never leaves a half-claimed slot behind.

use tracing::{debug, info, warn};

use crate::{
    AllocationError, ResourceKind, ResourceRequest, WorkerProcess, WorkerResources, WorkerSlot,
};

// ============================================================================
// Defaults
// ============================================================================

/// Default number of worker slots.
pub const DEFAULT_MAX_WORKERS: usize = 100;

/// Default width of the MAC / UDP block reserved per worker.
pub const DEFAULT_BLOCK_STEP: u32 = 9;

/// Base of the first worker's local UDP block.
pub const DEFAULT_LOCAL_UDP_BASE: u16 = 20000;

/// Base of the first worker's remote UDP block.
pub const DEFAULT_REMOTE_UDP_BASE: u16 = 30000;

/// Sizing and base values for a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    /// Number of slots.
    pub capacity: usize,
    /// Block width for the MAC and UDP kinds.
    pub step: u32,
    /// Listen port handed to the first worker.
    pub listen_port_base: u16,
    /// Local UDP base handed to the first worker.
    pub local_udp_base: u16,
    /// Remote UDP base handed to the first worker.
    pub remote_udp_base: u16,
}

impl RegistryLimits {
    /// Limits for a daemon listening on `daemon_port`; workers start at the next port.
    pub fn for_daemon_port(daemon_port: u16) -> Self {
        Self {
            capacity: DEFAULT_MAX_WORKERS,
            step: DEFAULT_BLOCK_STEP,
            listen_port_base: daemon_port.saturating_add(1),
            local_udp_base: DEFAULT_LOCAL_UDP_BASE,
            remote_udp_base: DEFAULT_REMOTE_UDP_BASE,
        }
    }

    fn base(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::ListenPort => u32::from(self.listen_port_base),
            ResourceKind::MacBase => 0,
            ResourceKind::LocalUdpBase => u32::from(self.local_udp_base),
            ResourceKind::RemoteUdpBase => u32::from(self.remote_udp_base),
        }
    }

    fn increment(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::ListenPort => 1,
            _ => self.step,
        }
    }
}

/// A slot index and the resources computed for it, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    slot: usize,
    resources: WorkerResources,
}

impl Allocation {
    /// Index of the free slot this allocation targets.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Resources the worker will be launched with.
    pub fn resources(&self) -> &WorkerResources {
        &self.resources
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Table of worker slots.
///
/// Slot indices are stable: a worker keeps its index for its whole life,
/// and a freed index is reused by the next allocation that finds it first.
#[derive(Debug)]
pub struct ResourceRegistry {
    slots: Vec<Option<WorkerSlot>>,
    limits: RegistryLimits,
}

impl ResourceRegistry {
    /// Creates an empty registry with `limits.capacity` free slots.
    pub fn new(limits: RegistryLimits) -> Self {
        let mut slots = Vec::with_capacity(limits.capacity);
        slots.resize_with(limits.capacity, || None);
        Self { slots, limits }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently holding a worker.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Iterates active slots in index order.
    pub fn active(&self) -> impl Iterator<Item = (usize, &WorkerSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|s| (index, s)))
    }

    /// Returns the active slot at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&WorkerSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Maps a 1-based position among active slots to a slot index.
    pub fn nth_active(&self, ordinal: usize) -> Option<usize> {
        let position = ordinal.checked_sub(1)?;
        self.active().nth(position).map(|(index, _)| index)
    }

    /// Computes a conflict-free allocation for `request` without claiming it.
    ///
    /// # Errors
    ///
    /// - `AllocationError::CapacityExceeded` if every slot is active
    /// - `AllocationError::ResourceConflict` if an explicit value collides
    /// - `AllocationError::RangeExhausted` if a default would overflow
    pub fn allocate(&self, request: &ResourceRequest) -> Result<Allocation, AllocationError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(AllocationError::CapacityExceeded {
                max: self.capacity(),
            })?;

        let listen_port = self.resolve(ResourceKind::ListenPort, request)?;
        let mac_base = self.resolve(ResourceKind::MacBase, request)?;
        let local_udp_base = self.resolve(ResourceKind::LocalUdpBase, request)?;
        let remote_udp_base = self.resolve(ResourceKind::RemoteUdpBase, request)?;

        let resources = WorkerResources {
            listen_port: narrow_port(ResourceKind::ListenPort, listen_port)?,
            mac_base,
            local_udp_base: narrow_port(ResourceKind::LocalUdpBase, local_udp_base)?,
            remote_udp_base: narrow_port(ResourceKind::RemoteUdpBase, remote_udp_base)?,
        };

        debug!(slot, ?resources, "Allocation computed");
        Ok(Allocation { slot, resources })
    }

    /// Commits an allocation, storing the worker in its slot.
    ///
    /// # Errors
    ///
    /// - `AllocationError::SlotTaken` if the slot was occupied after `allocate`
    pub fn occupy(
        &mut self,
        allocation: Allocation,
        process: Box<dyn WorkerProcess>,
        command_line: String,
    ) -> Result<&WorkerSlot, AllocationError> {
        let slot = self
            .slots
            .get_mut(allocation.slot)
            .ok_or(AllocationError::SlotTaken {
                slot: allocation.slot,
            })?;

        if slot.is_some() {
            return Err(AllocationError::SlotTaken {
                slot: allocation.slot,
            });
        }

        info!(
            slot = allocation.slot,
            pid = process.pid(),
            listen_port = allocation.resources.listen_port,
            mac_base = allocation.resources.mac_base,
            "Worker slot occupied"
        );

        Ok(slot.insert(WorkerSlot::new(
            process,
            allocation.resources,
            command_line,
        )))
    }

    /// Frees a slot and returns what it held. Freeing a free slot is a no-op.
    pub fn release(&mut self, index: usize) -> Option<WorkerSlot> {
        let released = self.slots.get_mut(index).and_then(Option::take);
        if let Some(ref slot) = released {
            debug!(slot = index, pid = slot.pid(), "Worker slot released");
        }
        released
    }

    /// Probes the worker in `index`; a dead worker's slot is released.
    ///
    /// Returns `false` for a free slot.
    pub fn probe(&mut self, index: usize) -> bool {
        let alive = match self.slots.get_mut(index) {
            Some(Some(slot)) => slot.process_mut().is_alive(),
            _ => return false,
        };

        if !alive {
            if let Some(slot) = self.release(index) {
                warn!(
                    slot = index,
                    pid = slot.pid(),
                    "Worker exited outside supervisor control, slot reclaimed"
                );
            }
        }
        alive
    }

    /// Probes every active slot, releasing the dead ones.
    ///
    /// Returns the number of slots reclaimed.
    pub fn reap_dead(&mut self) -> usize {
        (0..self.slots.len())
            .filter(|&index| self.get(index).is_some() && !self.probe(index))
            .count()
    }

    /// Releases every active slot, returning them in index order.
    pub fn drain(&mut self) -> Vec<WorkerSlot> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    // ========================================================================
    // Allocation helpers
    // ========================================================================

    /// Resolves one kind: validates an explicit value or derives a default.
    fn resolve(
        &self,
        kind: ResourceKind,
        request: &ResourceRequest,
    ) -> Result<u32, AllocationError> {
        match request.get(kind) {
            Some(value) => {
                let step = self.limits.step;
                let collides = self
                    .active()
                    .any(|(_, slot)| kind.conflicts(value, slot.resources().get(kind), step));
                if collides {
                    debug!(%kind, value, "Explicit value conflicts with an active worker");
                    return Err(AllocationError::ResourceConflict { kind, value });
                }
                Ok(value)
            }
            None => self.derive_default(kind),
        }
    }

    fn derive_default(&self, kind: ResourceKind) -> Result<u32, AllocationError> {
        let mut any_active = false;
        let mut highest = 0u32;
        for (_, slot) in self.active() {
            any_active = true;
            highest = highest.max(slot.resources().get(kind));
        }

        if highest == 0 {
            // Block 0 is only handed out while nobody holds it.
            if kind == ResourceKind::MacBase && any_active {
                return Ok(self.limits.step);
            }
            return Ok(self.limits.base(kind));
        }

        highest
            .checked_add(self.limits.increment(kind))
            .filter(|value| *value <= kind.max_value())
            .ok_or(AllocationError::RangeExhausted {
                kind,
                last: highest,
            })
    }
}

fn narrow_port(kind: ResourceKind, value: u32) -> Result<u16, AllocationError> {
    u16::try_from(value).map_err(|_| AllocationError::RangeExhausted { kind, last: value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::num::{NonZeroU16, NonZeroU32};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeWorker {
        pid: u32,
        alive: Arc<AtomicBool>,
    }

    impl WorkerProcess for FakeWorker {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn request_shutdown(&mut self) -> io::Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn limits(capacity: usize, step: u32) -> RegistryLimits {
        RegistryLimits {
            capacity,
            step,
            listen_port_base: 2001,
            local_udp_base: 20000,
            remote_udp_base: 30000,
        }
    }

    fn spawn_into(
        registry: &mut ResourceRegistry,
        request: ResourceRequest,
        pid: u32,
    ) -> Arc<AtomicBool> {
        let alive = Arc::new(AtomicBool::new(true));
        let allocation = registry.allocate(&request).unwrap();
        let worker = FakeWorker {
            pid,
            alive: Arc::clone(&alive),
        };
        registry
            .occupy(allocation, Box::new(worker), format!("worker {pid}"))
            .unwrap();
        alive
    }

    fn mac(value: u32) -> ResourceRequest {
        ResourceRequest {
            mac_base: NonZeroU32::new(value),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_allocation_uses_bases() {
        let registry = ResourceRegistry::new(limits(4, 32));
        let allocation = registry.allocate(&ResourceRequest::default()).unwrap();

        assert_eq!(allocation.slot(), 0);
        assert_eq!(
            *allocation.resources(),
            WorkerResources {
                listen_port: 2001,
                mac_base: 0,
                local_udp_base: 20000,
                remote_udp_base: 30000,
            }
        );
    }

    #[test]
    fn test_defaults_step_past_active_workers() {
        let mut registry = ResourceRegistry::new(limits(4, 32));
        for pid in 100..103 {
            spawn_into(&mut registry, ResourceRequest::default(), pid);
        }

        let resources: Vec<WorkerResources> =
            registry.active().map(|(_, s)| *s.resources()).collect();

        let ports: Vec<u16> = resources.iter().map(|r| r.listen_port).collect();
        let macs: Vec<u32> = resources.iter().map(|r| r.mac_base).collect();
        let locals: Vec<u16> = resources.iter().map(|r| r.local_udp_base).collect();
        let remotes: Vec<u16> = resources.iter().map(|r| r.remote_udp_base).collect();

        assert_eq!(ports, vec![2001, 2002, 2003]);
        assert_eq!(macs, vec![0, 32, 64]);
        assert_eq!(locals, vec![20000, 20032, 20064]);
        assert_eq!(remotes, vec![30000, 30032, 30064]);
    }

    #[test]
    fn test_default_blocks_never_overlap() {
        let mut registry = ResourceRegistry::new(limits(16, 9));
        for pid in 1..=16 {
            spawn_into(&mut registry, ResourceRequest::default(), pid);
        }

        let resources: Vec<WorkerResources> =
            registry.active().map(|(_, s)| *s.resources()).collect();
        for (i, a) in resources.iter().enumerate() {
            for b in resources.iter().skip(i + 1) {
                assert!(a.listen_port < b.listen_port);
                for kind in [
                    ResourceKind::MacBase,
                    ResourceKind::LocalUdpBase,
                    ResourceKind::RemoteUdpBase,
                ] {
                    assert!(a.get(kind).abs_diff(b.get(kind)) >= 9);
                }
            }
        }
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut registry = ResourceRegistry::new(limits(2, 9));
        spawn_into(&mut registry, ResourceRequest::default(), 1);
        spawn_into(&mut registry, ResourceRequest::default(), 2);

        let err = registry.allocate(&ResourceRequest::default()).unwrap_err();
        assert_eq!(err, AllocationError::CapacityExceeded { max: 2 });
    }

    #[test]
    fn test_explicit_port_conflict_leaves_registry_unchanged() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        spawn_into(&mut registry, ResourceRequest::default(), 1);

        let request = ResourceRequest {
            listen_port: NonZeroU16::new(2001),
            ..Default::default()
        };
        let err = registry.allocate(&request).unwrap_err();

        assert_eq!(
            err,
            AllocationError::ResourceConflict {
                kind: ResourceKind::ListenPort,
                value: 2001,
            }
        );
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_explicit_mac_within_step_rejected_on_both_sides() {
        let mut registry = ResourceRegistry::new(limits(4, 32));
        spawn_into(&mut registry, mac(64), 1);

        for value in [33, 63, 64, 65, 95] {
            let err = registry.allocate(&mac(value)).unwrap_err();
            assert!(
                matches!(
                    err,
                    AllocationError::ResourceConflict {
                        kind: ResourceKind::MacBase,
                        ..
                    }
                ),
                "mac {value} should conflict"
            );
        }

        assert!(registry.allocate(&mac(32)).is_ok());
        assert!(registry.allocate(&mac(96)).is_ok());
    }

    #[test]
    fn test_mac_zero_block_policy() {
        let mut registry = ResourceRegistry::new(limits(4, 9));

        // First worker ever: block 0.
        let first = spawn_into(&mut registry, ResourceRequest::default(), 1);
        assert_eq!(registry.get(0).unwrap().resources().mac_base, 0);

        // Block 0 held: next default is step, not 0.
        spawn_into(&mut registry, ResourceRequest::default(), 2);
        assert_eq!(registry.get(1).unwrap().resources().mac_base, 9);

        // With block 0 freed but block 9 active, the default follows the maximum.
        first.store(false, Ordering::SeqCst);
        assert_eq!(registry.reap_dead(), 1);
        let allocation = registry.allocate(&ResourceRequest::default()).unwrap();
        assert_eq!(allocation.slot(), 0);
        assert_eq!(allocation.resources().mac_base, 18);
    }

    #[test]
    fn test_mac_default_after_explicit_nonzero_worker() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        spawn_into(&mut registry, mac(100), 1);

        let allocation = registry.allocate(&ResourceRequest::default()).unwrap();
        assert_eq!(allocation.resources().mac_base, 109);
    }

    #[test]
    fn test_release_reuses_index_not_adjacent_values() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        spawn_into(&mut registry, ResourceRequest::default(), 1);
        spawn_into(&mut registry, ResourceRequest::default(), 2);
        spawn_into(&mut registry, ResourceRequest::default(), 3);

        let released = registry.release(1).unwrap();
        assert_eq!(released.pid(), 2);
        assert!(registry.release(1).is_none());

        let allocation = registry.allocate(&ResourceRequest::default()).unwrap();
        assert_eq!(allocation.slot(), 1);
        // Defaults continue past the highest active block.
        assert_eq!(allocation.resources().listen_port, 2004);
        assert_eq!(allocation.resources().mac_base, 27);
        for (_, slot) in registry.active() {
            assert!(slot.resources().mac_base.abs_diff(27) >= 9);
        }
    }

    #[test]
    fn test_probe_reclaims_dead_worker() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        let alive = spawn_into(&mut registry, ResourceRequest::default(), 7);

        assert!(registry.probe(0));
        alive.store(false, Ordering::SeqCst);
        assert!(!registry.probe(0));
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.probe(0));
        assert!(!registry.probe(99));
    }

    #[test]
    fn test_nth_active_skips_free_slots() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        spawn_into(&mut registry, ResourceRequest::default(), 1);
        spawn_into(&mut registry, ResourceRequest::default(), 2);
        spawn_into(&mut registry, ResourceRequest::default(), 3);
        registry.release(0);

        assert_eq!(registry.nth_active(0), None);
        assert_eq!(registry.nth_active(1), Some(1));
        assert_eq!(registry.nth_active(2), Some(2));
        assert_eq!(registry.nth_active(3), None);
    }

    #[test]
    fn test_occupy_rejects_taken_slot() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        let allocation = registry.allocate(&ResourceRequest::default()).unwrap();
        spawn_into(&mut registry, ResourceRequest::default(), 1);

        let worker = FakeWorker {
            pid: 2,
            alive: Arc::new(AtomicBool::new(true)),
        };
        let err = registry
            .occupy(allocation, Box::new(worker), String::new())
            .unwrap_err();
        assert_eq!(err, AllocationError::SlotTaken { slot: 0 });
    }

    #[test]
    fn test_range_exhausted_for_ports() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        let request = ResourceRequest {
            listen_port: NonZeroU16::new(u16::MAX),
            ..Default::default()
        };
        spawn_into(&mut registry, request, 1);

        let err = registry.allocate(&ResourceRequest::default()).unwrap_err();
        assert_eq!(
            err,
            AllocationError::RangeExhausted {
                kind: ResourceKind::ListenPort,
                last: u32::from(u16::MAX),
            }
        );
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = ResourceRegistry::new(limits(4, 9));
        spawn_into(&mut registry, ResourceRequest::default(), 1);
        spawn_into(&mut registry, ResourceRequest::default(), 2);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.drain().is_empty());
    }
}

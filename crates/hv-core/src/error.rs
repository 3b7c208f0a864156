//! Allocation errors following panic-free policy.

use crate::ResourceKind;
use thiserror::Error;

/// Errors that can occur while claiming a registry slot.
///
/// Every variant leaves the registry untouched: allocation either claims
/// all four resources or nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Every slot already hosts a worker.
    #[error("no free worker slot (max: {max})")]
    CapacityExceeded { max: usize },

    /// An explicit value collides with a block held by an active worker.
    #[error("{}", conflict_message(.kind, .value))]
    ResourceConflict { kind: ResourceKind, value: u32 },

    /// The derived default would overflow the value range of its kind.
    #[error("no {kind} left after {last}")]
    RangeExhausted { kind: ResourceKind, last: u32 },

    /// The slot named by an allocation was claimed in the meantime.
    #[error("worker slot {slot} is already in use")]
    SlotTaken { slot: usize },
}

fn conflict_message(kind: &ResourceKind, value: &u32) -> String {
    match kind {
        ResourceKind::ListenPort => format!("Port {value} already in use"),
        ResourceKind::MacBase => "Ether address overlapped".to_string(),
        ResourceKind::LocalUdpBase => "Local udp port overlapped".to_string(),
        ResourceKind::RemoteUdpBase => "Remote udp port overlapped".to_string(),
    }
}

//! Resource kinds consumed by a worker.
//!
//! Each worker owns one listen port plus three block bases. A block base
//! reserves `step` consecutive identifiers starting at the base, so a
//! worker can host up to `step` simulated interfaces.

use std::fmt;
use std::num::{NonZeroU16, NonZeroU32};

/// The four kinds of identifiers a worker is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Control port the worker listens on (`-p`). Exact-value uniqueness.
    ListenPort,
    /// First MAC address index (`-m`). Block of `step`.
    MacBase,
    /// First local UDP port (`-s`). Block of `step`.
    LocalUdpBase,
    /// First remote UDP port (`-c`). Block of `step`.
    RemoteUdpBase,
}

impl ResourceKind {
    /// All kinds, in the order allocation checks them.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ListenPort,
        ResourceKind::MacBase,
        ResourceKind::LocalUdpBase,
        ResourceKind::RemoteUdpBase,
    ];

    /// Returns true if two values of this kind conflict for the given block width.
    ///
    /// The listen port only conflicts on identical values; the block kinds
    /// conflict whenever the half-open ranges `[a, a + step)` and
    /// `[b, b + step)` overlap.
    pub fn conflicts(self, a: u32, b: u32, step: u32) -> bool {
        match self {
            ResourceKind::ListenPort => a == b,
            _ => a.abs_diff(b) < step,
        }
    }

    /// Largest value representable for this kind.
    pub fn max_value(self) -> u32 {
        match self {
            ResourceKind::MacBase => u32::MAX,
            _ => u32::from(u16::MAX),
        }
    }

    /// Command-line flag used to hand this value to a worker.
    pub fn flag(self) -> &'static str {
        match self {
            ResourceKind::ListenPort => "-p",
            ResourceKind::MacBase => "-m",
            ResourceKind::LocalUdpBase => "-s",
            ResourceKind::RemoteUdpBase => "-c",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListenPort => write!(f, "listen port"),
            Self::MacBase => write!(f, "ether address"),
            Self::LocalUdpBase => write!(f, "local udp port"),
            Self::RemoteUdpBase => write!(f, "remote udp port"),
        }
    }
}

/// Explicit values requested by the operator. `None` means "derive a default".
///
/// Zero is never a valid explicit value, which the `NonZero` types enforce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceRequest {
    pub listen_port: Option<NonZeroU16>,
    pub mac_base: Option<NonZeroU32>,
    pub local_udp_base: Option<NonZeroU16>,
    pub remote_udp_base: Option<NonZeroU16>,
}

impl ResourceRequest {
    /// Returns the explicit value for a kind, widened to `u32`.
    pub fn get(&self, kind: ResourceKind) -> Option<u32> {
        match kind {
            ResourceKind::ListenPort => self.listen_port.map(|v| u32::from(v.get())),
            ResourceKind::MacBase => self.mac_base.map(NonZeroU32::get),
            ResourceKind::LocalUdpBase => self.local_udp_base.map(|v| u32::from(v.get())),
            ResourceKind::RemoteUdpBase => self.remote_udp_base.map(|v| u32::from(v.get())),
        }
    }

    /// True if no value was given explicitly.
    pub fn is_empty(&self) -> bool {
        ResourceKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

/// The fully resolved identifiers a worker was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerResources {
    pub listen_port: u16,
    pub mac_base: u32,
    pub local_udp_base: u16,
    pub remote_udp_base: u16,
}

impl WorkerResources {
    /// Returns the value of a kind, widened to `u32`.
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::ListenPort => u32::from(self.listen_port),
            ResourceKind::MacBase => self.mac_base,
            ResourceKind::LocalUdpBase => u32::from(self.local_udp_base),
            ResourceKind::RemoteUdpBase => u32::from(self.remote_udp_base),
        }
    }

    /// Resource flags in the order workers receive them: `-p -s -c -m`.
    pub fn to_flags(&self) -> Vec<String> {
        [
            ResourceKind::ListenPort,
            ResourceKind::LocalUdpBase,
            ResourceKind::RemoteUdpBase,
            ResourceKind::MacBase,
        ]
        .iter()
        .flat_map(|kind| [kind.flag().to_string(), self.get(*kind).to_string()])
        .collect()
    }
}

//! Core identifier newtypes shared across the crate.

use serde::{Deserialize, Serialize};

/// Fragment id: which shard of the partitioned graph owns a vertex.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Fid(pub u32);

/// Global vertex id: (fragment id, local id) packed into 64 bits.
///
/// The split point between the two halves is derived once per cluster from
/// the fragment count; see [`crate::storage::IdCoder`].
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct Gid(pub u64);

/// Handle of one adjacency slot inside a [`crate::storage::SlotStore`].
///
/// A vertex's handle is valid only while the vertex is alive; deletion
/// resets the owning table entry to `None` before the liveness bit flips.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SlotId(pub u32);

/// Sentinel used to invalidate both endpoints of an edge rejected during
/// bulk classification. Never stored in adjacency.
pub const INVALID_GID: Gid = Gid(u64::MAX);

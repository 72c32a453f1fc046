//! Mutable partitioned adjacency storage.
//!
//! Implements the per-fragment storage layer: gid/lid encoding, liveness
//! tracking, the dynamic map-based adjacency store, the batch array CSR,
//! and the fragment orchestration on top of them.

/// Batch array CSR with a head/tail split id space.
pub mod csr;

/// Adaptive dense/sparse batch degree counting.
pub mod degree;

/// Fragment orchestration: CRUD, queries, derivation.
pub mod fragment;

/// Global-id encoding.
pub mod id;

/// Liveness bit-vectors.
pub mod liveness;

/// Archive codec for the batch CSR.
pub mod ser;

/// Dynamic map-based adjacency slots.
pub mod slots;

pub use csr::{BatchCsr, CsrEdge, TOMBSTONE};
pub use degree::{DegreeTally, DENSE_BATCH_RATIO};
pub use fragment::{
    CopyMode, Dir, Fragment, FragmentOpts, InducePredicate, LoadStrategy, Locality, ModifyKind,
    Nbr, PartitionMode,
};
pub use id::IdCoder;
pub use liveness::BitSet;
pub use ser::{read_csr, write_csr, ArchiveIo, FileArchive, MemArchive};
pub use slots::{LocalitySplit, SlotStore};

//! Global vertex map: original id ↔ global id assignment.
//!
//! The map is the only place original ids live; fragments reference vertices
//! exclusively by gid. Assignment is append-only per fragment: each new oid
//! takes the next unused local id, and ids of deleted vertices are never
//! reclaimed or reassigned.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use tracing::trace;

use crate::error::{FragmaError, Result};
use crate::model::{Oid, OidKind};
use crate::storage::IdCoder;
use crate::types::{Fid, Gid};

/// Cluster-wide oid ↔ gid map.
#[derive(Clone, Debug)]
pub struct GlobalVertexMap {
    coder: IdCoder,
    kind: Option<OidKind>,
    o2g: Vec<FxHashMap<Oid, Gid>>,
    g2o: Vec<Vec<Oid>>,
}

impl GlobalVertexMap {
    /// Creates an empty map for a cluster of `fnum` fragments.
    pub fn new(fnum: u32) -> Self {
        Self {
            coder: IdCoder::new(fnum),
            kind: None,
            o2g: vec![FxHashMap::default(); fnum as usize],
            g2o: vec![Vec::new(); fnum as usize],
        }
    }

    /// Number of fragments in the cluster.
    pub fn fragment_count(&self) -> u32 {
        self.coder.fnum()
    }

    /// The id coder shared with every fragment of the cluster.
    pub fn coder(&self) -> &IdCoder {
        &self.coder
    }

    /// Fragment an oid hashes to under the default partitioner.
    pub fn partition_of(&self, oid: &Oid) -> Fid {
        let mut hasher = FxHasher::default();
        oid.hash(&mut hasher);
        Fid((hasher.finish() % u64::from(self.coder.fnum())) as u32)
    }

    /// Gid assigned to `oid`, if any.
    pub fn get_gid(&self, oid: &Oid) -> Option<Gid> {
        let fid = self.partition_of(oid);
        self.o2g[fid.0 as usize].get(oid).copied()
    }

    /// Oid behind `gid`, if the gid is known.
    pub fn get_oid(&self, gid: Gid) -> Option<&Oid> {
        let fid = self.coder.fid(gid);
        let lid = self.coder.lid(gid);
        self.g2o
            .get(fid.0 as usize)
            .and_then(|oids| oids.get(lid as usize))
    }

    /// Registers `oid` in fragment `fid`, assigning the next unused local
    /// id. Idempotent for an already-known oid. Fails when the oid's kind
    /// disagrees with the kind the map already holds.
    pub fn add_vertex(&mut self, fid: Fid, oid: Oid) -> Result<Gid> {
        self.check_kind(oid.kind())?;
        assert!(
            (fid.0) < self.coder.fnum(),
            "fragment id {} out of range {}",
            fid.0,
            self.coder.fnum()
        );
        if let Some(&gid) = self.o2g[fid.0 as usize].get(&oid) {
            return Ok(gid);
        }
        let lid = self.g2o[fid.0 as usize].len() as u64;
        let gid = self.coder.gid(fid, lid);
        trace!(fid = fid.0, lid, "vmap.assign");
        self.g2o[fid.0 as usize].push(oid.clone());
        self.o2g[fid.0 as usize].insert(oid, gid);
        Ok(gid)
    }

    /// Number of vertices assigned to fragment `fid`.
    pub fn inner_vertex_count(&self, fid: Fid) -> u64 {
        self.g2o
            .get(fid.0 as usize)
            .map(|oids| oids.len() as u64)
            .unwrap_or(0)
    }

    fn check_kind(&mut self, kind: OidKind) -> Result<()> {
        match self.kind {
            None => {
                self.kind = Some(kind);
                Ok(())
            }
            Some(expected) if expected == kind => Ok(()),
            Some(expected) => Err(FragmaError::OidKindMismatch {
                expected,
                found: kind,
            }),
        }
    }
}

//! Fragment orchestration.
//!
//! A fragment is one worker's shard of the partitioned graph: the inner
//! vertices it owns, ghost references to outer vertices reached by boundary
//! edges, and the adjacency slots for both. Exactly one logical owner may
//! mutate a fragment at a time; concurrent readers are safe with each other
//! but never with a mutation.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::collective::AllGather;
use crate::error::Result;
use crate::model::Value;
use crate::storage::id::IdCoder;
use crate::storage::liveness::BitSet;
use crate::storage::slots::{SlotIter, SlotStore};
use crate::types::{Fid, Gid, SlotId};

mod build;
mod mutate;

pub use build::{CopyMode, InducePredicate};
pub use mutate::ModifyKind;

/// Whether each fragment stores a disjoint shard or the whole graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionMode {
    /// Disjoint shards; outer vertices are ghost references without
    /// adjacency or payload.
    Distributed,
    /// Every fragment stores the entire graph; outer vertices carry
    /// adjacency and payload as if they were inner.
    Duplicated,
}

/// Which adjacency directions a directed fragment materializes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadStrategy {
    /// Outgoing slots only.
    OnlyOut,
    /// Incoming slots only.
    OnlyIn,
    /// Both directions.
    BothOutIn,
}

impl LoadStrategy {
    /// Whether outgoing slots exist under this strategy.
    pub fn has_out(self) -> bool {
        matches!(self, LoadStrategy::OnlyOut | LoadStrategy::BothOutIn)
    }

    /// Whether incoming slots exist under this strategy.
    pub fn has_in(self) -> bool {
        matches!(self, LoadStrategy::OnlyIn | LoadStrategy::BothOutIn)
    }
}

/// Direction selector for adjacency queries.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dir {
    /// Outgoing edges.
    Out,
    /// Incoming edges.
    In,
}

/// Locality filter for neighbor iteration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Locality {
    /// Every neighbor.
    All,
    /// Neighbors owned by this fragment.
    InnerOnly,
    /// Ghost neighbors owned by remote fragments.
    OuterOnly,
}

/// Construction options for a fragment.
#[derive(Clone, Copy, Debug)]
pub struct FragmentOpts {
    /// This fragment's id.
    pub fid: Fid,
    /// Fragment count of the cluster.
    pub fnum: u32,
    /// Whether edges are directed.
    pub directed: bool,
    /// Partition mode.
    pub mode: PartitionMode,
    /// Load strategy for directed adjacency.
    pub strategy: LoadStrategy,
}

/// One neighbor handed out by adjacency iteration: the caller-facing local
/// id and a borrow of the edge payload.
#[derive(Clone, Copy, Debug)]
pub struct Nbr<'a> {
    /// Neighbor local id; values at or above `ivnum` address outer vertices.
    pub lid: u64,
    /// Edge payload.
    pub data: &'a Value,
}

/// Mutable partitioned graph fragment.
#[derive(Clone)]
pub struct Fragment {
    opts: FragmentOpts,
    coder: IdCoder,

    ivnum: u64,
    inner_alive: BitSet,
    inner_tomb: BitSet,
    alive_inner: u64,
    vdata: Vec<Value>,

    outer_index: FxHashMap<Gid, u64>,
    outer_gids: Vec<Gid>,
    outer_alive: BitSet,
    outer_tomb: BitSet,
    alive_outer: u64,
    odata: Vec<Value>,

    slots: SlotStore,
    oe_inner: Vec<Option<SlotId>>,
    ie_inner: Vec<Option<SlotId>>,
    oe_outer: Vec<Option<SlotId>>,
    ie_outer: Vec<Option<SlotId>>,

    edge_num: usize,
    selfloops: FxHashSet<u64>,
    mirrors: Vec<SmallVec<[u64; 4]>>,
}

impl Fragment {
    /// This fragment's id.
    pub fn fid(&self) -> Fid {
        self.opts.fid
    }

    /// Fragment count of the cluster.
    pub fn fnum(&self) -> u32 {
        self.opts.fnum
    }

    /// Whether edges are directed.
    pub fn directed(&self) -> bool {
        self.opts.directed
    }

    /// Partition mode.
    pub fn mode(&self) -> PartitionMode {
        self.opts.mode
    }

    /// Load strategy.
    pub fn strategy(&self) -> LoadStrategy {
        self.opts.strategy
    }

    /// The id coder derived from the fragment count.
    pub fn coder(&self) -> &IdCoder {
        &self.coder
    }

    /// Size of the inner local-id range `[0, ivnum)`.
    pub fn ivnum(&self) -> u64 {
        self.ivnum
    }

    /// Number of outer vertices ever referenced.
    pub fn ovnum(&self) -> u64 {
        self.outer_gids.len() as u64
    }

    /// Number of alive inner vertices.
    pub fn alive_inner_num(&self) -> u64 {
        self.alive_inner
    }

    /// Number of alive outer vertices.
    pub fn alive_outer_num(&self) -> u64 {
        self.alive_outer
    }

    /// Number of logical edges stored by this fragment.
    pub fn edge_num(&self) -> usize {
        self.edge_num
    }

    /// Number of alive self-loops.
    pub fn selfloops_num(&self) -> usize {
        self.selfloops.len()
    }

    /// Whether `gid` is owned by this fragment.
    pub fn is_inner_gid(&self, gid: Gid) -> bool {
        self.coder.is_inner(self.opts.fid, gid)
    }

    /// Caller-facing local id of an outer vertex with dense index `k`.
    pub fn outer_lid(&self, k: u64) -> u64 {
        self.coder.id_mask() - k
    }

    /// Dense outer index behind a stored id at or above `ivnum`; identity
    /// ids below `ivnum` are inner and yield `None`.
    pub fn outer_index_of(&self, lid: u64) -> Option<u64> {
        if lid >= self.ivnum {
            Some(self.coder.id_mask() - lid)
        } else {
            None
        }
    }

    /// Resolves a gid to this fragment's local id, if known here.
    pub fn gid_to_lid(&self, gid: Gid) -> Option<u64> {
        if self.is_inner_gid(gid) {
            let lid = self.coder.lid(gid);
            (lid < self.ivnum).then_some(lid)
        } else {
            self.outer_index.get(&gid).map(|&k| self.outer_lid(k))
        }
    }

    /// Resolves a local id back to the gid it denotes.
    pub fn lid_to_gid(&self, lid: u64) -> Option<Gid> {
        match self.outer_index_of(lid) {
            None => Some(self.coder.gid(self.opts.fid, lid)),
            Some(k) => self.outer_gids.get(k as usize).copied(),
        }
    }

    /// Whether the vertex behind `lid` is alive.
    pub fn is_alive(&self, lid: u64) -> bool {
        match self.outer_index_of(lid) {
            None => (lid as usize) < self.inner_alive.len() && self.inner_alive.get(lid as usize),
            Some(k) => (k as usize) < self.outer_alive.len() && self.outer_alive.get(k as usize),
        }
    }

    /// Payload of the vertex behind `lid`. Outer vertices carry payload only
    /// in duplicated mode.
    pub fn vertex_data(&self, lid: u64) -> Option<&Value> {
        match self.outer_index_of(lid) {
            None => self.vdata.get(lid as usize),
            Some(k) => match self.opts.mode {
                PartitionMode::Duplicated => self.odata.get(k as usize),
                PartitionMode::Distributed => None,
            },
        }
    }

    /// Alive inner local ids in ascending order.
    pub fn inner_vertices(&self) -> impl Iterator<Item = u64> + '_ {
        self.inner_alive.iter_ones().map(|lid| lid as u64)
    }

    /// Alive outer local ids (caller-facing form).
    pub fn outer_vertices(&self) -> impl Iterator<Item = u64> + '_ {
        self.outer_alive.iter_ones().map(|k| self.outer_lid(k as u64))
    }

    /// Inner local ids mirrored on fragment `fid` for message routing.
    pub fn mirrors(&self, fid: Fid) -> &[u64] {
        self.mirrors
            .get(fid.0 as usize)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the vertex behind a stored id has adjacency slots here.
    fn is_materialized(&self, stored: u64) -> bool {
        match self.outer_index_of(stored) {
            None => true,
            Some(_) => self.opts.mode == PartitionMode::Duplicated,
        }
    }

    fn handle(&self, stored: u64, dir: Dir) -> Option<SlotId> {
        let (inner_tab, outer_tab) = match (dir, self.opts.directed) {
            (Dir::Out, _) | (_, false) => (&self.oe_inner, &self.oe_outer),
            (Dir::In, true) => (&self.ie_inner, &self.ie_outer),
        };
        match self.outer_index_of(stored) {
            None => inner_tab.get(stored as usize).copied().flatten(),
            Some(k) => outer_tab.get(k as usize).copied().flatten(),
        }
    }

    fn handle_entry(&mut self, stored: u64, dir: Dir) -> &mut Option<SlotId> {
        let outer = self.outer_index_of(stored);
        let (inner_tab, outer_tab) = match (dir, self.opts.directed) {
            (Dir::Out, _) | (_, false) => (&mut self.oe_inner, &mut self.oe_outer),
            (Dir::In, true) => (&mut self.ie_inner, &mut self.ie_outer),
        };
        match outer {
            None => &mut inner_tab[stored as usize],
            Some(k) => &mut outer_tab[k as usize],
        }
    }

    fn assert_adjacency_supported(&self, lid: u64) {
        assert!(
            self.is_materialized(lid),
            "adjacency of a non-inner vertex is not materialized in distributed mode (lid {lid})"
        );
    }

    /// Out-degree of `lid`: distinct alive neighbors in its outgoing slot.
    pub fn out_degree(&self, lid: u64) -> usize {
        self.assert_adjacency_supported(lid);
        self.handle(lid, Dir::Out)
            .map(|h| self.slots.degree(h))
            .unwrap_or(0)
    }

    /// In-degree of `lid`. Equals the out-degree for undirected fragments.
    pub fn in_degree(&self, lid: u64) -> usize {
        self.assert_adjacency_supported(lid);
        self.handle(lid, Dir::In)
            .map(|h| self.slots.degree(h))
            .unwrap_or(0)
    }

    /// Iterates the neighbors of `lid` in direction `dir`.
    pub fn neighbors(&self, lid: u64, dir: Dir) -> AdjIter<'_> {
        self.neighbors_filtered(lid, dir, Locality::All)
    }

    /// Neighbor iteration restricted by locality. When the slot carries a
    /// locality partition (see [`SlotStore::partition_by_locality`]) the
    /// filtered walk scans only the matching half.
    pub fn neighbors_filtered(&self, lid: u64, dir: Dir, locality: Locality) -> AdjIter<'_> {
        self.assert_adjacency_supported(lid);
        let Some(handle) = self.handle(lid, dir) else {
            return AdjIter {
                inner: AdjIterInner::Empty,
            };
        };
        if locality != Locality::All {
            if let Some(split) = self.slots.split(handle) {
                let keys = match locality {
                    Locality::InnerOnly => split.inner.iter(),
                    Locality::OuterOnly => split.outer.iter(),
                    Locality::All => unreachable!(),
                };
                return AdjIter {
                    inner: AdjIterInner::Split {
                        keys,
                        store: &self.slots,
                        slot: handle,
                    },
                };
            }
        }
        AdjIter {
            inner: AdjIterInner::Full {
                iter: self.slots.iter(handle),
                ivnum: self.ivnum,
                locality,
            },
        }
    }

    /// Whether an edge `(u, v)` is stored, looked up through whichever
    /// orientation this fragment materializes.
    pub fn has_edge(&self, u: u64, v: u64) -> bool {
        self.edge_data(u, v).is_some()
    }

    /// Payload of the stored edge `(u, v)`, if present.
    pub fn edge_data(&self, u: u64, v: u64) -> Option<&Value> {
        if !self.opts.directed {
            if let Some(data) = self.handle(u, Dir::Out).and_then(|h| self.slots.get(h, v)) {
                return Some(data);
            }
            if u != v {
                return self.handle(v, Dir::Out).and_then(|h| self.slots.get(h, u));
            }
            return None;
        }
        if self.opts.strategy.has_out() {
            if let Some(data) = self.handle(u, Dir::Out).and_then(|h| self.slots.get(h, v)) {
                return Some(data);
            }
        }
        if self.opts.strategy.has_in() {
            return self.handle(v, Dir::In).and_then(|h| self.slots.get(h, u));
        }
        None
    }

    /// Rebuilds the locality partition of every slot; reads through
    /// [`Self::neighbors_filtered`] then scan only the requested half. Must
    /// be re-run after structural changes to stay consistent.
    pub fn partition_adjacency_by_locality(&mut self) {
        self.slots.partition_by_locality(self.ivnum);
    }

    /// Gids of locally-known dead vertices, ascending.
    pub fn local_dead_gids(&self) -> Vec<Gid> {
        let mut dead: Vec<Gid> = self
            .inner_tomb
            .iter_ones()
            .map(|lid| self.coder.gid(self.opts.fid, lid as u64))
            .chain(
                self.outer_tomb
                    .iter_ones()
                    .filter_map(|k| self.outer_gids.get(k).copied()),
            )
            .collect();
        dead.sort_unstable();
        dead
    }

    /// Collective query for the cluster-wide dead vertex set. Every worker
    /// must call this in the same logical step; the collective blocks until
    /// all contributions arrive.
    pub fn gather_dead_gids(&self, comm: &impl AllGather) -> Result<Vec<Gid>> {
        let gathered = comm.all_gather(self.local_dead_gids())?;
        let mut dead: Vec<Gid> = gathered.into_iter().flatten().collect();
        dead.sort_unstable();
        dead.dedup();
        Ok(dead)
    }

    /// Compact tally position for a stored id: inner lids map to themselves,
    /// outer stored ids to `ivnum + dense index`.
    fn compact_pos(&self, stored: u64) -> u64 {
        match self.outer_index_of(stored) {
            None => stored,
            Some(k) => self.ivnum + k,
        }
    }

    /// Full tally position range covering inner and outer vertices.
    fn compact_range(&self) -> usize {
        (self.ivnum + self.ovnum()) as usize
    }
}

/// Iterator over the neighbors of one (vertex, direction) pair.
pub struct AdjIter<'a> {
    inner: AdjIterInner<'a>,
}

enum AdjIterInner<'a> {
    Empty,
    Full {
        iter: SlotIter<'a>,
        ivnum: u64,
        locality: Locality,
    },
    Split {
        keys: std::slice::Iter<'a, u64>,
        store: &'a SlotStore,
        slot: SlotId,
    },
}

impl<'a> Iterator for AdjIter<'a> {
    type Item = Nbr<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            AdjIterInner::Empty => None,
            AdjIterInner::Full {
                iter,
                ivnum,
                locality,
            } => {
                for (nbr, data) in iter.by_ref() {
                    let keep = match locality {
                        Locality::All => true,
                        Locality::InnerOnly => nbr < *ivnum,
                        Locality::OuterOnly => nbr >= *ivnum,
                    };
                    if keep {
                        return Some(Nbr { lid: nbr, data });
                    }
                }
                None
            }
            AdjIterInner::Split { keys, store, slot } => {
                // A stale partition may reference removed entries; those are
                // skipped rather than surfaced.
                for &nbr in keys.by_ref() {
                    if let Some(data) = store.get(*slot, nbr) {
                        return Some(Nbr { lid: nbr, data });
                    }
                }
                None
            }
        }
    }
}

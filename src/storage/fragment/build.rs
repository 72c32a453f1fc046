//! Fragment construction: bulk init and fragment-to-fragment derivation.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::model::Value;
use crate::storage::degree::DegreeTally;
use crate::storage::id::IdCoder;
use crate::storage::liveness::BitSet;
use crate::storage::slots::SlotStore;
use crate::types::{Gid, SlotId, INVALID_GID};

use super::{Dir, Fragment, FragmentOpts, LoadStrategy, PartitionMode};

/// How [`Fragment::copy_from`] treats directed adjacency.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopyMode {
    /// Faithful copy.
    Identical,
    /// Swap outgoing and incoming adjacency; a no-op for undirected sources.
    Reverse,
}

/// Predicate selecting an induced subgraph. An edge predicate takes
/// precedence and implicitly determines the vertex set from the endpoints of
/// admitted edges.
pub enum InducePredicate<'a> {
    /// Keep vertices admitted by the predicate and edges between them.
    Vertex(&'a dyn Fn(Gid, &Value) -> bool),
    /// Keep edges admitted by the predicate and their endpoints.
    Edge(&'a dyn Fn(Gid, Gid, &Value) -> bool),
}

impl Fragment {
    fn empty(opts: FragmentOpts) -> Fragment {
        Fragment {
            opts,
            coder: IdCoder::new(opts.fnum),
            ivnum: 0,
            inner_alive: BitSet::default(),
            inner_tomb: BitSet::default(),
            alive_inner: 0,
            vdata: Vec::new(),
            outer_index: FxHashMap::default(),
            outer_gids: Vec::new(),
            outer_alive: BitSet::default(),
            outer_tomb: BitSet::default(),
            alive_outer: 0,
            odata: Vec::new(),
            slots: SlotStore::new(),
            oe_inner: Vec::new(),
            ie_inner: Vec::new(),
            oe_outer: Vec::new(),
            ie_outer: Vec::new(),
            edge_num: 0,
            selfloops: FxHashSet::default(),
            mirrors: vec![SmallVec::new(); opts.fnum as usize],
        }
    }

    /// Bulk construction from vertex and edge batches.
    ///
    /// Endpoints unknown to this fragment invalidate their edge; referenced
    /// outer vertices are collected, deduplicated, sorted and assigned dense
    /// indices before the insertion pass.
    pub fn init(
        opts: FragmentOpts,
        vertices: Vec<(Gid, Value)>,
        edges: Vec<(Gid, Gid, Value)>,
    ) -> Fragment {
        let mut frag = Self::empty(opts);
        let mut ivnum = 0u64;
        for (gid, _) in &vertices {
            if frag.is_inner_gid(*gid) {
                ivnum = ivnum.max(frag.coder.lid(*gid) + 1);
            }
        }
        frag.grow_inner(ivnum);
        frag.apply_vertex_inserts(vertices);
        frag.classify_and_attach(edges);
        frag.rebuild_mirrors();
        debug!(
            fid = frag.opts.fid.0,
            ivnum = frag.ivnum,
            ovnum = frag.ovnum(),
            edges = frag.edge_num,
            "fragment.init"
        );
        frag
    }

    /// Extends the inner id range to `[0, new_ivnum)`; ids never shrink.
    pub(super) fn grow_inner(&mut self, new_ivnum: u64) {
        if new_ivnum <= self.ivnum {
            return;
        }
        let n = new_ivnum as usize;
        self.inner_alive.grow(n, false);
        self.inner_tomb.grow(n, false);
        self.vdata.resize(n, Value::Null);
        self.oe_inner.resize(n, None);
        self.ie_inner.resize(n, None);
        self.ivnum = new_ivnum;
    }

    /// Registers an outer gid, assigning the next dense index. Created
    /// entries start dead until an edge or vertex batch revives them.
    pub(super) fn ensure_outer(&mut self, gid: Gid) -> u64 {
        if let Some(&k) = self.outer_index.get(&gid) {
            return k;
        }
        let k = self.outer_gids.len() as u64;
        self.outer_gids.push(gid);
        self.outer_index.insert(gid, k);
        self.outer_alive.grow(k as usize + 1, false);
        self.outer_tomb.grow(k as usize + 1, false);
        self.odata.push(Value::Null);
        self.oe_outer.push(None);
        self.ie_outer.push(None);
        k
    }

    /// Applies a vertex batch: payload writes plus liveness. Tombstoned ids
    /// stay dead; foreign vertices are ignored outside duplicated mode.
    pub(super) fn apply_vertex_inserts(&mut self, vertices: Vec<(Gid, Value)>) {
        for (gid, data) in vertices {
            if self.is_inner_gid(gid) {
                let lid = self.coder.lid(gid);
                if lid >= self.ivnum {
                    self.grow_inner(lid + 1);
                }
                let idx = lid as usize;
                if self.inner_tomb.get(idx) {
                    continue;
                }
                if !self.inner_alive.get(idx) {
                    self.inner_alive.set(idx);
                    self.alive_inner += 1;
                }
                self.vdata[idx] = data;
            } else if self.opts.mode == PartitionMode::Duplicated {
                let k = self.ensure_outer(gid) as usize;
                if self.outer_tomb.get(k) {
                    continue;
                }
                if !self.outer_alive.get(k) {
                    self.outer_alive.set(k);
                    self.alive_outer += 1;
                }
                self.odata[k] = data;
            }
        }
    }

    fn endpoint_ok(&self, gid: Gid) -> bool {
        if gid == INVALID_GID {
            return false;
        }
        if self.is_inner_gid(gid) {
            let lid = self.coder.lid(gid);
            lid < self.ivnum && !self.inner_tomb.get(lid as usize)
        } else {
            match self.outer_index.get(&gid) {
                Some(&k) => !self.outer_tomb.get(k as usize),
                None => true,
            }
        }
    }

    /// Classifies edge endpoints, invalidates edges this fragment cannot
    /// hold, registers fresh outer vertices, and runs the bulk attach.
    pub(super) fn classify_and_attach(&mut self, edges: Vec<(Gid, Gid, Value)>) {
        let mut batch = edges;
        let mut invalidated = 0usize;
        for (src, dst, _) in batch.iter_mut() {
            let locally_held = self.opts.mode == PartitionMode::Duplicated
                || self.is_inner_gid(*src)
                || self.is_inner_gid(*dst);
            if !locally_held || !self.endpoint_ok(*src) || !self.endpoint_ok(*dst) {
                *src = INVALID_GID;
                *dst = INVALID_GID;
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            debug!(invalidated, "fragment.edges.invalidated");
        }

        let mut fresh: BTreeSet<Gid> = BTreeSet::new();
        for (src, dst, _) in &batch {
            if *src == INVALID_GID {
                continue;
            }
            for gid in [*src, *dst] {
                if !self.is_inner_gid(gid) && !self.outer_index.contains_key(&gid) {
                    fresh.insert(gid);
                }
            }
        }
        for gid in fresh {
            self.ensure_outer(gid);
        }

        let mut stored = Vec::with_capacity(batch.len());
        for (src, dst, data) in batch {
            if src == INVALID_GID {
                continue;
            }
            let su = self.resolve_alive(src);
            let sv = self.resolve_alive(dst);
            stored.push((su, sv, data));
        }
        self.attach_batch(stored);
    }

    /// Stored id for a known endpoint, reviving never-seen ids referenced
    /// for the first time by an edge.
    fn resolve_alive(&mut self, gid: Gid) -> u64 {
        if self.is_inner_gid(gid) {
            let lid = self.coder.lid(gid);
            let idx = lid as usize;
            if !self.inner_alive.get(idx) {
                self.inner_alive.set(idx);
                self.alive_inner += 1;
            }
            lid
        } else {
            let k = *self
                .outer_index
                .get(&gid)
                .expect("outer endpoint registered during classification");
            if !self.outer_alive.get(k as usize) {
                self.outer_alive.set(k as usize);
                self.alive_outer += 1;
            }
            self.outer_lid(k)
        }
    }

    fn stored_of_pos(&self, pos: u64) -> u64 {
        if pos < self.ivnum {
            pos
        } else {
            self.coder.id_mask() - (pos - self.ivnum)
        }
    }

    /// Two-pass bulk attach: adaptive degree counting feeds slot
    /// reservation, then the append pass dispatches every edge.
    fn attach_batch(&mut self, stored: Vec<(u64, u64, Value)>) {
        if stored.is_empty() {
            return;
        }
        let range = self.compact_range();
        let directed = self.opts.directed;
        let strategy = self.opts.strategy;

        let mut tally_out = (!directed || strategy.has_out())
            .then(|| DegreeTally::for_batch(stored.len(), self.edge_num, range));
        let mut tally_in = (directed && strategy.has_in())
            .then(|| DegreeTally::for_batch(stored.len(), self.edge_num, range));
        for &(su, sv, _) in &stored {
            if !directed {
                let tally = tally_out.as_mut().expect("undirected batches count out");
                if self.is_materialized(su) {
                    tally.bump(self.compact_pos(su));
                }
                if su != sv && self.is_materialized(sv) {
                    tally.bump(self.compact_pos(sv));
                }
            } else {
                if let Some(tally) = tally_out.as_mut() {
                    if self.is_materialized(su) {
                        tally.bump(self.compact_pos(su));
                    }
                }
                if let Some(tally) = tally_in.as_mut() {
                    if self.is_materialized(sv) {
                        tally.bump(self.compact_pos(sv));
                    }
                }
            }
        }
        if let Some(tally) = &tally_out {
            self.reserve_slots(tally, Dir::Out);
        }
        if let Some(tally) = &tally_in {
            self.reserve_slots(tally, Dir::In);
        }
        for (su, sv, data) in stored {
            self.attach_edge(su, sv, data);
        }
    }

    fn reserve_slots(&mut self, tally: &DegreeTally, dir: Dir) {
        for (pos, extra) in tally.entries() {
            let stored = self.stored_of_pos(pos);
            match self.handle(stored, dir) {
                Some(handle) => self.slots.reserve(handle, extra as usize),
                None => {
                    let handle = self.slots.new_slot_with_capacity(extra as usize);
                    *self.handle_entry(stored, dir) = Some(handle);
                }
            }
        }
    }

    /// Dispatches one edge into the slot store, maintaining the edge counter
    /// and the self-loop set. Counters move only when an entry was created.
    pub(super) fn attach_edge(&mut self, su: u64, sv: u64, data: Value) {
        let mut created = false;
        if !self.opts.directed {
            if self.is_materialized(su) {
                created |= self.insert_into(su, Dir::Out, sv, data.clone());
            }
            if su != sv && self.is_materialized(sv) {
                created |= self.insert_into(sv, Dir::Out, su, data);
            }
        } else {
            if self.opts.strategy.has_out() && self.is_materialized(su) {
                created |= self.insert_into(su, Dir::Out, sv, data.clone());
            }
            if self.opts.strategy.has_in() && self.is_materialized(sv) {
                created |= self.insert_into(sv, Dir::In, su, data);
            }
        }
        if created {
            self.edge_num += 1;
            if su == sv {
                self.selfloops.insert(su);
            }
        }
    }

    fn insert_into(&mut self, vertex: u64, dir: Dir, nbr: u64, data: Value) -> bool {
        match self.handle(vertex, dir) {
            Some(handle) => {
                let (_, created) = self.slots.insert(handle, nbr, data);
                created
            }
            None => {
                let handle = self.slots.new_slot(nbr, data);
                *self.handle_entry(vertex, dir) = Some(handle);
                true
            }
        }
    }

    /// Every stored id that can own adjacency slots here.
    pub(super) fn materialized_ids_vec(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = (0..self.ivnum).collect();
        if self.opts.mode == PartitionMode::Duplicated {
            ids.extend((0..self.ovnum()).map(|k| self.outer_lid(k)));
        }
        ids
    }

    /// Recomputes per-remote-fragment mirror lists: the inner vertices with
    /// a boundary edge into each remote fragment.
    pub(super) fn rebuild_mirrors(&mut self) {
        let mut mirrors: Vec<FxHashSet<u64>> =
            vec![FxHashSet::default(); self.opts.fnum as usize];
        let lids: Vec<u64> = self.inner_vertices().collect();
        for lid in lids {
            let mut dirs: SmallVec<[Dir; 2]> = SmallVec::new();
            dirs.push(Dir::Out);
            if self.opts.directed {
                dirs.push(Dir::In);
            }
            for dir in dirs {
                let Some(handle) = self.handle(lid, dir) else {
                    continue;
                };
                for (nbr, _) in self.slots.iter(handle) {
                    let Some(k) = self.outer_index_of(nbr) else {
                        continue;
                    };
                    if let Some(&gid) = self.outer_gids.get(k as usize) {
                        let remote = self.coder.fid(gid);
                        mirrors[remote.0 as usize].insert(lid);
                    }
                }
            }
        }
        self.mirrors = mirrors
            .into_iter()
            .map(|set| {
                let mut list: SmallVec<[u64; 4]> = set.into_iter().collect();
                list.sort_unstable();
                list
            })
            .collect();
    }

    /// Whether the arc `(src, dst)` has a local outgoing-slot entry. Arcs
    /// into this fragment from a non-materialized outer source exist only in
    /// the destination's incoming slot and must be counted there.
    fn arc_in_out_slot(&self, src: u64, dst: u64) -> bool {
        self.opts.strategy.has_out()
            && self
                .handle(src, Dir::Out)
                .map(|handle| self.slots.contains(handle, dst))
                .unwrap_or(false)
    }

    /// Recomputes the edge counter and self-loop set from the slot store.
    /// Derivations and vertex deletion call this after reshaping adjacency.
    pub(super) fn recount(&mut self) {
        self.selfloops.clear();
        let mut edges = 0usize;
        let ids = self.materialized_ids_vec();
        if self.opts.directed {
            if self.opts.strategy.has_out() {
                for &stored in &ids {
                    if let Some(handle) = self.handle(stored, Dir::Out) {
                        edges += self.slots.degree(handle);
                        if self.slots.contains(handle, stored) {
                            self.selfloops.insert(stored);
                        }
                    }
                }
            }
            if self.opts.strategy.has_in() {
                for &stored in &ids {
                    let Some(handle) = self.handle(stored, Dir::In) else {
                        continue;
                    };
                    for (nbr, _) in self.slots.iter(handle) {
                        // Arc (nbr → stored); skip if the outgoing side
                        // already counted it.
                        if !self.arc_in_out_slot(nbr, stored) {
                            edges += 1;
                            if nbr == stored {
                                self.selfloops.insert(stored);
                            }
                        }
                    }
                }
            }
        } else {
            for stored in ids {
                let Some(handle) = self.handle(stored, Dir::Out) else {
                    continue;
                };
                for (nbr, _) in self.slots.iter(handle) {
                    if nbr == stored {
                        self.selfloops.insert(stored);
                        edges += 1;
                    } else if nbr > stored {
                        edges += 1;
                    } else {
                        // Count the pair from the low side only when the low
                        // side's slot does not mirror it (one-sided boundary
                        // edge).
                        let mirrored = self
                            .handle(nbr, Dir::Out)
                            .map(|other| self.slots.contains(other, stored))
                            .unwrap_or(false);
                        if !mirrored {
                            edges += 1;
                        }
                    }
                }
            }
        }
        self.edge_num = edges;
    }

    /// Enumerates this fragment's logical edges as gid triples.
    pub(super) fn logical_edges(&self) -> Vec<(Gid, Gid, Value)> {
        let mut out = Vec::new();
        let ids = self.materialized_ids_vec();
        if self.opts.directed {
            if self.opts.strategy.has_out() {
                for &stored in &ids {
                    let Some(handle) = self.handle(stored, Dir::Out) else {
                        continue;
                    };
                    let Some(this) = self.lid_to_gid(stored) else {
                        continue;
                    };
                    for (nbr, data) in self.slots.iter(handle) {
                        let Some(other) = self.lid_to_gid(nbr) else {
                            continue;
                        };
                        out.push((this, other, data.clone()));
                    }
                }
            }
            if self.opts.strategy.has_in() {
                for &stored in &ids {
                    let Some(handle) = self.handle(stored, Dir::In) else {
                        continue;
                    };
                    let Some(this) = self.lid_to_gid(stored) else {
                        continue;
                    };
                    for (nbr, data) in self.slots.iter(handle) {
                        if self.arc_in_out_slot(nbr, stored) {
                            continue;
                        }
                        let Some(other) = self.lid_to_gid(nbr) else {
                            continue;
                        };
                        out.push((other, this, data.clone()));
                    }
                }
            }
        } else {
            for stored in ids {
                let Some(handle) = self.handle(stored, Dir::Out) else {
                    continue;
                };
                let Some(this) = self.lid_to_gid(stored) else {
                    continue;
                };
                for (nbr, data) in self.slots.iter(handle) {
                    let canonical = if nbr == stored || nbr > stored {
                        true
                    } else {
                        !self
                            .handle(nbr, Dir::Out)
                            .map(|other| self.slots.contains(other, stored))
                            .unwrap_or(false)
                    };
                    if !canonical {
                        continue;
                    }
                    let Some(other) = self.lid_to_gid(nbr) else {
                        continue;
                    };
                    out.push((this, other, data.clone()));
                }
            }
        }
        out
    }

    /// Duplicates `source`, optionally reversing directed adjacency by
    /// swapping the outgoing and incoming slot tables.
    pub fn copy_from(source: &Fragment, mode: CopyMode) -> Fragment {
        let mut frag = source.clone();
        frag.slots = SlotStore::snapshot_of(&source.slots);
        if mode == CopyMode::Reverse && frag.opts.directed {
            std::mem::swap(&mut frag.oe_inner, &mut frag.ie_inner);
            std::mem::swap(&mut frag.oe_outer, &mut frag.ie_outer);
            frag.opts.strategy = match frag.opts.strategy {
                LoadStrategy::OnlyOut => LoadStrategy::OnlyIn,
                LoadStrategy::OnlyIn => LoadStrategy::OnlyOut,
                LoadStrategy::BothOutIn => LoadStrategy::BothOutIn,
            };
        }
        frag
    }

    /// Derives a directed fragment from an undirected one without
    /// re-scanning edges: every slot is copied twice so outgoing and
    /// incoming adjacency can evolve independently afterwards.
    pub fn to_directed_from(source: &Fragment) -> Fragment {
        assert!(
            !source.opts.directed,
            "to_directed_from requires an undirected source"
        );
        let offset = source.slots.len() as u32;
        let mut frag = source.clone();
        frag.opts.directed = true;
        frag.opts.strategy = LoadStrategy::BothOutIn;
        frag.slots = SlotStore::double_of(&source.slots);
        frag.ie_inner = frag
            .oe_inner
            .iter()
            .map(|entry| entry.map(|h| SlotId(h.0 + offset)))
            .collect();
        frag.ie_outer = frag
            .oe_outer
            .iter()
            .map(|entry| entry.map(|h| SlotId(h.0 + offset)))
            .collect();
        frag.recount();
        frag
    }

    /// Derives an undirected fragment from a directed one: the outgoing
    /// adjacency is copied as-is, every incoming edge is re-inserted as an
    /// additional outgoing edge (duplicates merge under the insert rule),
    /// and the separate incoming structure is dropped.
    pub fn to_undirected_from(source: &Fragment) -> Fragment {
        assert!(
            source.opts.directed,
            "to_undirected_from requires a directed source"
        );
        let mut frag = source.clone();
        frag.opts.directed = false;
        frag.opts.strategy = LoadStrategy::BothOutIn;
        frag.slots = SlotStore::new();
        frag.oe_inner = vec![None; frag.ivnum as usize];
        frag.ie_inner = vec![None; frag.ivnum as usize];
        frag.oe_outer = vec![None; frag.ovnum() as usize];
        frag.ie_outer = vec![None; frag.ovnum() as usize];
        for stored in source.materialized_ids_vec() {
            if let Some(handle) = source.handle(stored, Dir::Out) {
                for (nbr, data) in source.slots.iter(handle) {
                    frag.insert_into(stored, Dir::Out, nbr, data.clone());
                }
            }
        }
        for stored in source.materialized_ids_vec() {
            if let Some(handle) = source.handle(stored, Dir::In) {
                for (nbr, data) in source.slots.iter(handle) {
                    frag.insert_into(stored, Dir::Out, nbr, data.clone());
                }
            }
        }
        frag.recount();
        frag.rebuild_mirrors();
        frag
    }

    /// Derives the subgraph admitted by `pred`. Outer-vertex bookkeeping is
    /// rebuilt from scratch from the filtered edge set.
    pub fn induce_subgraph(source: &Fragment, pred: InducePredicate<'_>) -> Fragment {
        let known = source.known_vertices();
        let (vertices, edges) = match pred {
            InducePredicate::Edge(admit) => {
                let edges: Vec<(Gid, Gid, Value)> = source
                    .logical_edges()
                    .into_iter()
                    .filter(|(src, dst, data)| admit(*src, *dst, data))
                    .collect();
                let mut keep: BTreeSet<Gid> = BTreeSet::new();
                for (src, dst, _) in &edges {
                    keep.insert(*src);
                    keep.insert(*dst);
                }
                let vertices = known
                    .into_iter()
                    .filter(|(gid, _)| keep.contains(gid))
                    .collect();
                (vertices, edges)
            }
            InducePredicate::Vertex(admit) => {
                let vertices: Vec<(Gid, Value)> = known
                    .into_iter()
                    .filter(|(gid, data)| admit(*gid, data))
                    .collect();
                let keep: FxHashSet<Gid> = vertices.iter().map(|(gid, _)| *gid).collect();
                let edges = source
                    .logical_edges()
                    .into_iter()
                    .filter(|(src, dst, _)| keep.contains(src) && keep.contains(dst))
                    .collect();
                (vertices, edges)
            }
        };
        Fragment::init(source.opts, vertices, edges)
    }

    /// Every alive vertex this fragment knows, with the payload available to
    /// it (outer vertices carry none in distributed mode).
    fn known_vertices(&self) -> Vec<(Gid, Value)> {
        let mut out: Vec<(Gid, Value)> = self
            .inner_vertices()
            .map(|lid| {
                (
                    self.coder.gid(self.opts.fid, lid),
                    self.vdata[lid as usize].clone(),
                )
            })
            .collect();
        for k in self.outer_alive.iter_ones() {
            let gid = self.outer_gids[k];
            let data = match self.opts.mode {
                PartitionMode::Duplicated => self.odata[k].clone(),
                PartitionMode::Distributed => Value::Null,
            };
            out.push((gid, data));
        }
        out
    }
}

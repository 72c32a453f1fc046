//! Array-backed adjacency for large, infrequent batch loads.
//!
//! The id space `[min_id, max_id)` is split into a head sub-range growing
//! upward and a tail sub-range growing downward; the two never overlap
//! because both advance away from the midpoint. Each vertex owns a
//! (begin, len, cap) window into a shared edge arena. Bulk insertion is a
//! two-pass count-then-fill algorithm fed by [`DegreeTally`]; removal
//! tombstones entries in place and compacts only the touched slots once per
//! batch.

use rustc_hash::FxHashSet;

use crate::model::Value;
use crate::storage::degree::DegreeTally;

/// Neighbor sentinel marking a tombstoned arena entry. Doubles as the
/// reserved "skip" source id in removal batches: a pair whose source is the
/// sentinel was already invalidated by an earlier pass and is a no-op.
pub const TOMBSTONE: u64 = u64::MAX;

/// One stored arc: target local id plus payload.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrEdge {
    /// Target local id.
    pub nbr: u64,
    /// Edge payload.
    pub data: Value,
}

#[derive(Clone, Copy, Debug, Default)]
struct AdjRange {
    begin: usize,
    len: usize,
    cap: usize,
}

#[derive(Clone, Debug, Default)]
struct CsrBlock {
    index: Vec<AdjRange>,
    arena: Vec<CsrEdge>,
}

impl CsrBlock {
    fn add_vertices(&mut self, n: usize) {
        self.index.resize(self.index.len() + n, AdjRange::default());
    }

    /// Ensures `extra` free capacity in the slot, relocating its window to
    /// the arena tail when it has outgrown its place.
    fn reserve(&mut self, slot: usize, extra: usize) {
        let range = self.index[slot];
        if range.cap - range.len >= extra {
            return;
        }
        let new_cap = (range.len + extra).max(range.cap * 2);
        let new_begin = self.arena.len();
        for offset in 0..range.len {
            let entry = self.arena[range.begin + offset].clone();
            self.arena.push(entry);
        }
        for _ in range.len..new_cap {
            self.arena.push(CsrEdge {
                nbr: TOMBSTONE,
                data: Value::Null,
            });
        }
        self.index[slot] = AdjRange {
            begin: new_begin,
            len: range.len,
            cap: new_cap,
        };
    }

    fn push(&mut self, slot: usize, nbr: u64, data: Value) {
        let range = &mut self.index[slot];
        assert!(
            range.len < range.cap,
            "slot capacity must be reserved before append"
        );
        self.arena[range.begin + range.len] = CsrEdge { nbr, data };
        range.len += 1;
    }

    fn neighbors(&self, slot: usize) -> &[CsrEdge] {
        let range = self.index[slot];
        &self.arena[range.begin..range.begin + range.len]
    }

    fn neighbors_mut(&mut self, slot: usize) -> &mut [CsrEdge] {
        let range = self.index[slot];
        &mut self.arena[range.begin..range.begin + range.len]
    }

    /// Drops tombstoned entries from the slot, preserving order. Returns the
    /// number removed.
    fn compact(&mut self, slot: usize) -> usize {
        let range = self.index[slot];
        let mut write = 0;
        for read in 0..range.len {
            if self.arena[range.begin + read].nbr != TOMBSTONE {
                if write != read {
                    self.arena.swap(range.begin + write, range.begin + read);
                }
                write += 1;
            }
        }
        for offset in write..range.len {
            self.arena[range.begin + offset] = CsrEdge {
                nbr: TOMBSTONE,
                data: Value::Null,
            };
        }
        let removed = range.len - write;
        self.index[slot].len = write;
        removed
    }

    fn sort_neighbors(&mut self, slot: usize) {
        self.neighbors_mut(slot).sort_by_key(|entry| entry.nbr);
    }

    /// Collapses duplicate neighbors keeping the first occurrence. Returns
    /// the number of duplicates dropped.
    fn dedup_neighbors(&mut self, slot: usize) -> usize {
        let range = self.index[slot];
        let mut seen = FxHashSet::default();
        for offset in 0..range.len {
            let nbr = self.arena[range.begin + offset].nbr;
            if nbr != TOMBSTONE && !seen.insert(nbr) {
                self.arena[range.begin + offset].nbr = TOMBSTONE;
            }
        }
        self.compact(slot)
    }
}

#[derive(Clone, Copy, Debug)]
enum Place {
    Head(usize),
    Tail(usize),
}

/// Mutable batch CSR with a head/tail split id space.
#[derive(Clone, Debug)]
pub struct BatchCsr {
    min_id: u64,
    max_id: u64,
    max_head_id: u64,
    min_tail_id: u64,
    dedup: bool,
    tail_enabled: bool,
    head: CsrBlock,
    tail: CsrBlock,
    edge_num: usize,
}

impl BatchCsr {
    /// Creates an empty structure over `[min_id, max_id)`. Both sub-ranges
    /// start empty at their respective ends of the space.
    pub fn with_range(min_id: u64, max_id: u64, dedup: bool, tail_enabled: bool) -> Self {
        assert!(min_id <= max_id, "id range inverted");
        Self {
            min_id,
            max_id,
            max_head_id: min_id,
            min_tail_id: max_id,
            dedup,
            tail_enabled,
            head: CsrBlock::default(),
            tail: CsrBlock::default(),
            edge_num: 0,
        }
    }

    /// Lower bound of the id space.
    pub fn min_id(&self) -> u64 {
        self.min_id
    }

    /// Upper bound of the id space.
    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    /// Exclusive top of the head sub-range.
    pub fn max_head_id(&self) -> u64 {
        self.max_head_id
    }

    /// Inclusive bottom of the tail sub-range.
    pub fn min_tail_id(&self) -> u64 {
        self.min_tail_id
    }

    /// Whether duplicate (src, dst) insertions collapse to one entry.
    pub fn dedup(&self) -> bool {
        self.dedup
    }

    /// Whether the downward-growing tail region is in use.
    pub fn tail_enabled(&self) -> bool {
        self.tail_enabled
    }

    /// Number of live stored arcs.
    pub fn edge_num(&self) -> usize {
        self.edge_num
    }

    /// Populated head ids, `[min_id, max_head_id)`.
    pub fn head_range(&self) -> std::ops::Range<u64> {
        self.min_id..self.max_head_id
    }

    /// Populated tail ids, `[min_tail_id, max_id)`.
    pub fn tail_range(&self) -> std::ops::Range<u64> {
        self.min_tail_id..self.max_id
    }

    /// Grows the head upward by `to_head` ids and the tail downward by
    /// `to_tail`. The growths are independent; crossing ranges abort.
    pub fn add_vertices(&mut self, to_head: u64, to_tail: u64) {
        if to_tail > 0 {
            assert!(self.tail_enabled, "tail region is disabled");
        }
        let new_head = self
            .max_head_id
            .checked_add(to_head)
            .expect("head range overflow");
        let new_tail = self
            .min_tail_id
            .checked_sub(to_tail)
            .expect("tail range underflow");
        assert!(new_head <= new_tail, "head and tail id ranges would cross");
        self.max_head_id = new_head;
        self.min_tail_id = new_tail;
        self.head.add_vertices(to_head as usize);
        self.tail.add_vertices(to_tail as usize);
    }

    /// Whether `v` falls inside a populated sub-range.
    pub fn contains_vertex(&self, v: u64) -> bool {
        self.head_range().contains(&v) || self.tail_range().contains(&v)
    }

    fn place(&self, v: u64) -> Place {
        if self.head_range().contains(&v) {
            Place::Head((v - self.min_id) as usize)
        } else if self.tail_range().contains(&v) {
            Place::Tail((self.max_id - 1 - v) as usize)
        } else {
            panic!("vertex {v} outside the populated id ranges");
        }
    }

    fn block(&self, place: Place) -> (&CsrBlock, usize) {
        match place {
            Place::Head(slot) => (&self.head, slot),
            Place::Tail(slot) => (&self.tail, slot),
        }
    }

    fn block_mut(&mut self, place: Place) -> (&mut CsrBlock, usize) {
        match place {
            Place::Head(slot) => (&mut self.head, slot),
            Place::Tail(slot) => (&mut self.tail, slot),
        }
    }

    /// Live out-neighbors of `v`.
    pub fn neighbors(&self, v: u64) -> &[CsrEdge] {
        let (block, slot) = self.block(self.place(v));
        block.neighbors(slot)
    }

    /// Live degree of `v`.
    pub fn degree(&self, v: u64) -> usize {
        self.neighbors(v).len()
    }

    fn tally_for(&self, batch_len: usize) -> DegreeTally {
        DegreeTally::for_batch(
            batch_len,
            self.edge_num,
            (self.max_id - self.min_id) as usize,
        )
    }

    /// Adds `(src, dst)` arcs keyed by source.
    pub fn add_forward_edges(&mut self, edges: &[(u64, u64, Value)]) {
        let tally = self.tally_for(edges.len());
        self.add_forward_edges_with(tally, edges);
    }

    /// Forward insertion with a caller-chosen (typically forced) tally
    /// representation.
    pub fn add_forward_edges_with(&mut self, mut tally: DegreeTally, edges: &[(u64, u64, Value)]) {
        for &(src, _, _) in edges {
            tally.bump(src - self.min_id);
        }
        self.reserve_from(&tally);
        for (src, dst, data) in edges {
            let (block, slot) = self.block_mut(self.place(*src));
            block.push(slot, *dst, data.clone());
            self.edge_num += 1;
        }
        self.finish_batch(&tally);
    }

    /// Adds `(src, dst)` arcs keyed by destination (reverse orientation).
    pub fn add_reversed_edges(&mut self, edges: &[(u64, u64, Value)]) {
        let tally = self.tally_for(edges.len());
        self.add_reversed_edges_with(tally, edges);
    }

    /// Reverse insertion with a caller-chosen tally representation.
    pub fn add_reversed_edges_with(&mut self, mut tally: DegreeTally, edges: &[(u64, u64, Value)]) {
        for &(_, dst, _) in edges {
            tally.bump(dst - self.min_id);
        }
        self.reserve_from(&tally);
        for (src, dst, data) in edges {
            let (block, slot) = self.block_mut(self.place(*dst));
            block.push(slot, *src, data.clone());
            self.edge_num += 1;
        }
        self.finish_batch(&tally);
    }

    /// Adds each edge in both orientations (undirected load).
    pub fn add_edges(&mut self, edges: &[(u64, u64, Value)]) {
        let mut tally = self.tally_for(edges.len() * 2);
        for &(src, dst, _) in edges {
            tally.bump(src - self.min_id);
            tally.bump(dst - self.min_id);
        }
        self.reserve_from(&tally);
        for (src, dst, data) in edges {
            let (block, slot) = self.block_mut(self.place(*src));
            block.push(slot, *dst, data.clone());
            self.edge_num += 1;
            let (block, slot) = self.block_mut(self.place(*dst));
            block.push(slot, *src, data.clone());
            self.edge_num += 1;
        }
        self.finish_batch(&tally);
    }

    fn reserve_from(&mut self, tally: &DegreeTally) {
        let min_id = self.min_id;
        for (pos, extra) in tally.entries() {
            let place = self.place(pos + min_id);
            let (block, slot) = self.block_mut(place);
            block.reserve(slot, extra as usize);
        }
    }

    /// Post-batch pass over the touched slots: dedup (keep first occurrence)
    /// when deduplicating, otherwise sort by neighbor id for merge-join
    /// reads.
    fn finish_batch(&mut self, tally: &DegreeTally) {
        let min_id = self.min_id;
        let dedup = self.dedup;
        let mut dropped = 0;
        for (pos, _) in tally.entries() {
            let place = self.place(pos + min_id);
            let (block, slot) = self.block_mut(place);
            if dedup {
                dropped += block.dedup_neighbors(slot);
            } else {
                block.sort_neighbors(slot);
            }
        }
        self.edge_num -= dropped;
    }

    /// Overwrites the payload of the first `(src, dst)` entry. Returns the
    /// number of entries written (0 or 1).
    pub fn update_one(&mut self, src: u64, dst: u64, data: Value) -> usize {
        let (block, slot) = self.block_mut(self.place(src));
        for entry in block.neighbors_mut(slot) {
            if entry.nbr == dst {
                entry.data = data;
                return 1;
            }
        }
        0
    }

    /// Overwrites the payload of every `(src, dst)` entry (multigraph
    /// regime). Returns the number written.
    pub fn update(&mut self, src: u64, dst: u64, data: Value) -> usize {
        let (block, slot) = self.block_mut(self.place(src));
        let mut written = 0;
        for entry in block.neighbors_mut(slot) {
            if entry.nbr == dst {
                entry.data = data.clone();
                written += 1;
            }
        }
        written
    }

    /// Tombstones the first `(src, dst)` entry without compacting. Returns
    /// the number tombstoned; the slot must be compacted before counters
    /// settle.
    pub fn remove_one_with_tomb(&mut self, src: u64, dst: u64) -> usize {
        let (block, slot) = self.block_mut(self.place(src));
        for entry in block.neighbors_mut(slot) {
            if entry.nbr == dst {
                entry.nbr = TOMBSTONE;
                entry.data = Value::Null;
                return 1;
            }
        }
        0
    }

    /// Tombstones every `(src, dst)` entry without compacting.
    pub fn remove_with_tomb(&mut self, src: u64, dst: u64) -> usize {
        let (block, slot) = self.block_mut(self.place(src));
        let mut removed = 0;
        for entry in block.neighbors_mut(slot) {
            if entry.nbr == dst {
                entry.nbr = TOMBSTONE;
                entry.data = Value::Null;
                removed += 1;
            }
        }
        removed
    }

    /// Drops tombstones from `v`'s slot and settles the edge counter.
    /// Returns the number removed.
    pub fn compact_vertex(&mut self, v: u64) -> usize {
        let (block, slot) = self.block_mut(self.place(v));
        let removed = block.compact(slot);
        self.edge_num -= removed;
        removed
    }

    /// Removes a batch of `(src, dst)` pairs: first match per pair when
    /// deduplicating, all matches otherwise. Pairs whose source is the
    /// reserved sentinel are skipped as no-ops. Touched slots are compacted
    /// exactly once, after the whole batch.
    pub fn remove_edges(&mut self, pairs: &[(u64, u64)]) {
        let mut touched: FxHashSet<u64> = FxHashSet::default();
        for &(src, dst) in pairs {
            if src == TOMBSTONE {
                continue;
            }
            let removed = if self.dedup {
                self.remove_one_with_tomb(src, dst)
            } else {
                self.remove_with_tomb(src, dst)
            };
            if removed > 0 {
                touched.insert(src);
            }
        }
        for &v in &touched {
            self.compact_vertex(v);
        }
    }

    /// Rebuilds one slot from decoded entries; archive restore only.
    pub(crate) fn restore_slot(&mut self, v: u64, entries: Vec<CsrEdge>) {
        let count = entries.len();
        let (block, slot) = self.block_mut(self.place(v));
        block.reserve(slot, count);
        for entry in entries {
            block.push(slot, entry.nbr, entry.data);
        }
        self.edge_num += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triples(pairs: &[(u64, u64)]) -> Vec<(u64, u64, Value)> {
        pairs
            .iter()
            .map(|&(src, dst)| (src, dst, Value::Null))
            .collect()
    }

    #[test]
    fn head_and_tail_grow_apart() {
        let mut csr = BatchCsr::with_range(0, 100, true, true);
        csr.add_vertices(10, 5);
        assert_eq!(csr.max_head_id(), 10);
        assert_eq!(csr.min_tail_id(), 95);
        assert!(csr.contains_vertex(9));
        assert!(csr.contains_vertex(95));
        assert!(!csr.contains_vertex(50));
        csr.add_vertices(3, 2);
        assert_eq!(csr.head_range(), 0..13);
        assert_eq!(csr.tail_range(), 93..100);
    }

    #[test]
    #[should_panic(expected = "would cross")]
    fn crossing_ranges_abort() {
        let mut csr = BatchCsr::with_range(0, 10, true, true);
        csr.add_vertices(6, 5);
    }

    #[test]
    #[should_panic(expected = "tail region is disabled")]
    fn tail_growth_requires_tail() {
        let mut csr = BatchCsr::with_range(0, 10, true, false);
        csr.add_vertices(2, 1);
    }

    #[test]
    fn forward_and_reversed_orientations() {
        let mut csr = BatchCsr::with_range(0, 10, false, false);
        csr.add_vertices(4, 0);
        csr.add_forward_edges(&triples(&[(0, 1), (0, 2)]));
        csr.add_reversed_edges(&triples(&[(3, 1)]));
        assert_eq!(csr.degree(0), 2);
        // Reversed insertion lands on the destination's slot.
        assert_eq!(csr.degree(1), 1);
        assert_eq!(csr.neighbors(1)[0].nbr, 3);
        assert_eq!(csr.edge_num(), 3);
    }

    #[test]
    fn dedup_collapses_keeping_first_payload() {
        let mut csr = BatchCsr::with_range(0, 8, true, false);
        csr.add_vertices(4, 0);
        csr.add_forward_edges(&[
            (0, 1, Value::Int(1)),
            (0, 2, Value::Int(2)),
            (0, 1, Value::Int(9)),
        ]);
        assert_eq!(csr.degree(0), 2);
        assert_eq!(csr.edge_num(), 2);
        let first = csr
            .neighbors(0)
            .iter()
            .find(|entry| entry.nbr == 1)
            .expect("entry kept");
        assert_eq!(first.data, Value::Int(1));
    }

    #[test]
    fn multigraph_keeps_duplicates_sorted() {
        let mut csr = BatchCsr::with_range(0, 8, false, false);
        csr.add_vertices(4, 0);
        csr.add_forward_edges(&triples(&[(0, 3), (0, 1), (0, 3)]));
        let nbrs: Vec<u64> = csr.neighbors(0).iter().map(|entry| entry.nbr).collect();
        assert_eq!(nbrs, vec![1, 3, 3]);
        assert_eq!(csr.edge_num(), 3);
    }

    #[test]
    fn undirected_load_stores_both_orientations() {
        let mut csr = BatchCsr::with_range(0, 8, true, false);
        csr.add_vertices(4, 0);
        csr.add_edges(&triples(&[(0, 1), (1, 2), (3, 3)]));
        assert_eq!(csr.degree(0), 1);
        assert_eq!(csr.degree(1), 2);
        assert_eq!(csr.degree(2), 1);
        assert_eq!(csr.neighbors(2)[0].nbr, 1);
        // The self-loop lands in its own slot twice, then dedups to one.
        assert_eq!(csr.degree(3), 1);
        assert_eq!(csr.edge_num(), 5);
    }

    #[test]
    fn remove_edges_skips_sentinel_and_compacts_once() {
        let mut csr = BatchCsr::with_range(0, 8, false, false);
        csr.add_vertices(4, 0);
        csr.add_forward_edges(&triples(&[(0, 1), (0, 2), (0, 1), (1, 2)]));
        csr.remove_edges(&[(0, 1), (TOMBSTONE, 2), (3, 0)]);
        // Multigraph removal drops every (0, 1) entry; the sentinel pair and
        // the unmatched pair are no-ops.
        let nbrs: Vec<u64> = csr.neighbors(0).iter().map(|entry| entry.nbr).collect();
        assert_eq!(nbrs, vec![2]);
        assert_eq!(csr.edge_num(), 2);
    }

    #[test]
    fn dedup_removal_takes_one_entry() {
        let mut csr = BatchCsr::with_range(0, 8, true, false);
        csr.add_vertices(2, 0);
        csr.add_forward_edges(&triples(&[(0, 1), (1, 0)]));
        csr.remove_edges(&[(0, 1)]);
        assert_eq!(csr.degree(0), 0);
        assert_eq!(csr.degree(1), 1);
        assert_eq!(csr.edge_num(), 1);
    }

    #[test]
    fn update_one_vs_update_all() {
        let mut csr = BatchCsr::with_range(0, 8, false, false);
        csr.add_vertices(2, 0);
        csr.add_forward_edges(&triples(&[(0, 1), (0, 1)]));
        assert_eq!(csr.update_one(0, 1, Value::Int(5)), 1);
        let payloads: Vec<&Value> = csr.neighbors(0).iter().map(|entry| &entry.data).collect();
        assert_eq!(payloads, vec![&Value::Int(5), &Value::Null]);
        assert_eq!(csr.update(0, 1, Value::Int(7)), 2);
        assert!(csr.neighbors(0).iter().all(|e| e.data == Value::Int(7)));
        assert_eq!(csr.update_one(0, 3, Value::Int(1)), 0);
    }

    #[test]
    fn forced_sparse_and_dense_paths_agree() {
        let edges: Vec<(u64, u64, Value)> = (0..50u64)
            .map(|i| (i % 7, (i * 3) % 11, Value::Int(i as i64)))
            .collect();
        let mut forced_sparse = BatchCsr::with_range(0, 16, true, false);
        forced_sparse.add_vertices(12, 0);
        forced_sparse.add_forward_edges_with(DegreeTally::sparse(), &edges);

        let mut forced_dense = BatchCsr::with_range(0, 16, true, false);
        forced_dense.add_vertices(12, 0);
        forced_dense.add_forward_edges_with(DegreeTally::dense(16), &edges);

        assert_eq!(forced_sparse.edge_num(), forced_dense.edge_num());
        for v in 0..12u64 {
            assert_eq!(
                forced_sparse.neighbors(v),
                forced_dense.neighbors(v),
                "vertex {v} diverged between counting paths"
            );
        }
    }

    #[test]
    fn tail_vertices_store_edges() {
        let mut csr = BatchCsr::with_range(0, 100, true, true);
        csr.add_vertices(2, 3);
        csr.add_forward_edges(&triples(&[(99, 0), (97, 1), (99, 97)]));
        assert_eq!(csr.degree(99), 2);
        assert_eq!(csr.degree(97), 1);
        assert_eq!(csr.edge_num(), 3);
    }
}

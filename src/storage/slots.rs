//! Dynamic map-based adjacency store.
//!
//! A slot is one (vertex, direction) adjacency list: a map from stored
//! neighbor id to edge payload. Slots are addressed by [`SlotId`] handles
//! that stay stable for the life of the store; a deleted vertex's slot is
//! emptied, never reallocated, so stale handles can be detected by the
//! owning table rather than by the store.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::model::Value;
use crate::types::SlotId;

#[derive(Clone, Debug, Default)]
struct Slot {
    entries: FxHashMap<u64, Value>,
    split: Option<LocalitySplit>,
}

/// Stored neighbor ids of one slot partitioned into local and ghost halves.
///
/// Built explicitly by [`SlotStore::partition_by_locality`]; any structural
/// change leaves it stale until the partition is rebuilt.
#[derive(Clone, Debug, Default)]
pub struct LocalitySplit {
    /// Neighbors owned by this fragment, ascending.
    pub inner: SmallVec<[u64; 4]>,
    /// Ghost neighbors owned by remote fragments, ascending.
    pub outer: SmallVec<[u64; 4]>,
}

/// Collection of independently addressable adjacency slots.
#[derive(Clone, Debug, Default)]
pub struct SlotStore {
    slots: Vec<Slot>,
}

impl SlotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated slots (live and emptied).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot has ever been allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: SlotId) -> &Slot {
        let idx = id.0 as usize;
        assert!(idx < self.slots.len(), "dangling slot handle {idx}");
        &self.slots[idx]
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        let idx = id.0 as usize;
        assert!(idx < self.slots.len(), "dangling slot handle {idx}");
        &mut self.slots[idx]
    }

    /// Allocates a fresh one-entry slot.
    pub fn new_slot(&mut self, nbr: u64, data: Value) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        let mut entries = FxHashMap::default();
        entries.insert(nbr, data);
        self.slots.push(Slot {
            entries,
            split: None,
        });
        id
    }

    /// Allocates an empty slot pre-sized for `cap` entries. Bulk loads size
    /// slots from the batch degree tally before the append pass.
    pub fn new_slot_with_capacity(&mut self, cap: usize) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(Slot {
            entries: FxHashMap::with_capacity_and_hasher(cap, Default::default()),
            split: None,
        });
        id
    }

    /// Inserts `nbr` into the slot, merging the payload if the neighbor is
    /// already present. Returns the (unchanged) handle and whether a new
    /// entry was created; degree counters must only move on `true`.
    pub fn insert(&mut self, id: SlotId, nbr: u64, data: Value) -> (SlotId, bool) {
        let slot = self.slot_mut(id);
        match slot.entries.entry(nbr) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                occupied.get_mut().merge_from(data);
                (id, false)
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(data);
                (id, true)
            }
        }
    }

    /// Empties the slot entirely; used when the owning vertex is deleted.
    pub fn remove_all(&mut self, id: SlotId) {
        let slot = self.slot_mut(id);
        slot.entries.clear();
        slot.split = None;
    }

    /// Removes a single entry, reporting how many (0 or 1) were removed.
    pub fn remove_one(&mut self, id: SlotId, nbr: u64) -> usize {
        let slot = self.slot_mut(id);
        usize::from(slot.entries.remove(&nbr).is_some())
    }

    /// Removes every entry matching `pred`, reporting how many were removed.
    pub fn remove_matching(&mut self, id: SlotId, mut pred: impl FnMut(u64) -> bool) -> usize {
        let slot = self.slot_mut(id);
        let before = slot.entries.len();
        slot.entries.retain(|&nbr, _| !pred(nbr));
        before - slot.entries.len()
    }

    /// Whether the slot contains `nbr`.
    pub fn contains(&self, id: SlotId, nbr: u64) -> bool {
        self.slot(id).entries.contains_key(&nbr)
    }

    /// Payload stored for `nbr`, if present.
    pub fn get(&self, id: SlotId, nbr: u64) -> Option<&Value> {
        self.slot(id).entries.get(&nbr)
    }

    /// Mutable payload access for in-place edge updates.
    pub fn get_mut(&mut self, id: SlotId, nbr: u64) -> Option<&mut Value> {
        self.slot_mut(id).entries.get_mut(&nbr)
    }

    /// Number of entries in the slot.
    pub fn degree(&self, id: SlotId) -> usize {
        self.slot(id).entries.len()
    }

    /// Pre-sizes the slot for `extra` additional entries; bulk loads call
    /// this from the batch degree tally before appending.
    pub fn reserve(&mut self, id: SlotId, extra: usize) {
        self.slot_mut(id).entries.reserve(extra);
    }

    /// Iterates `(stored neighbor id, payload)` in arbitrary order.
    pub fn iter(&self, id: SlotId) -> SlotIter<'_> {
        SlotIter(self.slot(id).entries.iter())
    }

    /// Locality partition of the slot, if one has been built.
    pub fn split(&self, id: SlotId) -> Option<&LocalitySplit> {
        self.slot(id).split.as_ref()
    }

    /// Deep copy of `other`, preserving every handle.
    pub fn snapshot_of(other: &SlotStore) -> SlotStore {
        other.clone()
    }

    /// Two independent deep copies of every slot in `other`: the original
    /// handle addresses the first copy, handle + `other.len()` the second.
    /// Lets an undirected adjacency evolve independently as outgoing and
    /// incoming afterwards.
    pub fn double_of(other: &SlotStore) -> SlotStore {
        let mut slots = Vec::with_capacity(other.slots.len() * 2);
        slots.extend(other.slots.iter().cloned());
        slots.extend(other.slots.iter().cloned());
        SlotStore { slots }
    }

    /// Rebuilds the inner/outer partition of every slot. Stored ids below
    /// `ivnum` are local, everything else is a ghost neighbor. Must be
    /// re-run after structural changes; nothing invalidates it automatically.
    pub fn partition_by_locality(&mut self, ivnum: u64) {
        for slot in &mut self.slots {
            let mut inner: SmallVec<[u64; 4]> = SmallVec::new();
            let mut outer: SmallVec<[u64; 4]> = SmallVec::new();
            for &nbr in slot.entries.keys() {
                if nbr < ivnum {
                    inner.push(nbr);
                } else {
                    outer.push(nbr);
                }
            }
            inner.sort_unstable();
            outer.sort_unstable();
            slot.split = Some(LocalitySplit { inner, outer });
        }
    }
}

/// Iterator over one slot's `(stored neighbor id, payload)` entries.
pub struct SlotIter<'a>(std::collections::hash_map::Iter<'a, u64, Value>);

impl<'a> Iterator for SlotIter<'a> {
    type Item = (u64, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(&nbr, data)| (nbr, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn duplicate_insert_merges_and_reports_not_created() {
        let mut store = SlotStore::new();
        let slot = store.new_slot(7, Value::Null);
        let (_, created) = store.insert(slot, 7, Value::Int(3));
        assert!(!created, "duplicate neighbor must not create an entry");
        assert_eq!(store.degree(slot), 1);
        // Null payload was replaced under the merge rule.
        assert_eq!(store.get(slot, 7), Some(&Value::Int(3)));

        let (_, created) = store.insert(slot, 7, Value::Int(9));
        assert!(!created);
        // Existing scalar wins; incoming discarded.
        assert_eq!(store.get(slot, 7), Some(&Value::Int(3)));
    }

    #[test]
    fn map_payloads_merge_fields() {
        let mut store = SlotStore::new();
        let slot = store.new_slot(1, Value::Map(BTreeMap::from([("a".into(), Value::Int(1))])));
        store.insert(
            slot,
            1,
            Value::Map(BTreeMap::from([("b".into(), Value::Int(2))])),
        );
        assert_eq!(
            store.get(slot, 1),
            Some(&Value::Map(BTreeMap::from([
                ("a".into(), Value::Int(1)),
                ("b".into(), Value::Int(2)),
            ])))
        );
    }

    #[test]
    fn remove_one_reports_count() {
        let mut store = SlotStore::new();
        let slot = store.new_slot(4, Value::Null);
        store.insert(slot, 5, Value::Null);
        assert_eq!(store.remove_one(slot, 4), 1);
        assert_eq!(store.remove_one(slot, 4), 0);
        assert_eq!(store.degree(slot), 1);
    }

    #[test]
    fn remove_all_keeps_handle_addressable() {
        let mut store = SlotStore::new();
        let slot = store.new_slot(1, Value::Null);
        store.insert(slot, 2, Value::Null);
        store.remove_all(slot);
        assert_eq!(store.degree(slot), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn double_of_offsets_second_copy() {
        let mut store = SlotStore::new();
        let a = store.new_slot(10, Value::Int(1));
        let b = store.new_slot(20, Value::Int(2));
        let doubled = SlotStore::double_of(&store);
        assert_eq!(doubled.len(), 4);
        let offset = store.len() as u32;
        for id in [a, b] {
            let twin = SlotId(id.0 + offset);
            let mut original: Vec<(u64, Value)> = doubled
                .iter(id)
                .map(|(nbr, data)| (nbr, data.clone()))
                .collect();
            let mut copy: Vec<(u64, Value)> = doubled
                .iter(twin)
                .map(|(nbr, data)| (nbr, data.clone()))
                .collect();
            original.sort_by_key(|(nbr, _)| *nbr);
            copy.sort_by_key(|(nbr, _)| *nbr);
            assert_eq!(original, copy);
        }
    }

    #[test]
    fn partition_splits_by_ivnum() {
        let mut store = SlotStore::new();
        let slot = store.new_slot(2, Value::Null);
        store.insert(slot, 900, Value::Null);
        store.insert(slot, 1, Value::Null);
        store.insert(slot, 950, Value::Null);
        assert!(store.split(slot).is_none());
        store.partition_by_locality(10);
        let split = store.split(slot).expect("split built");
        assert_eq!(split.inner.as_slice(), &[1, 2]);
        assert_eq!(split.outer.as_slice(), &[900, 950]);
    }

    #[test]
    #[should_panic(expected = "dangling slot handle")]
    fn dangling_handle_aborts() {
        let store = SlotStore::new();
        let _ = store.degree(SlotId(0));
    }
}

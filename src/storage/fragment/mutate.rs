//! Incremental mutation: Insert / Update / Delete plus the line-based
//! ingestion entry points.
//!
//! All mutation is single-writer; none of these paths roll back on partial
//! progress. Unknown vertex references in Update/Delete batches are skipped
//! silently: the vertex map, not the fragment, is the source of truth for
//! what exists.

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ingest::{parse_line, MutationRecord};
use crate::model::Value;
use crate::types::Gid;
use crate::vmap::GlobalVertexMap;

use super::{Dir, Fragment};

/// Which mutation a `modify_*` ingestion batch applies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModifyKind {
    /// Create vertices/edges (upserting payloads of existing ones).
    Insert,
    /// Overwrite payloads of existing vertices/edges.
    Update,
    /// Remove vertices/edges.
    Delete,
}

impl Fragment {
    /// Inserts a batch of vertices and edges. Id ranges only grow; ids of
    /// deleted vertices stay dead. Edge dispatch matches bulk construction.
    pub fn insert(&mut self, vertices: Vec<(Gid, Value)>, edges: Vec<(Gid, Gid, Value)>) {
        let edge_batch = edges.len();
        self.apply_vertex_inserts(vertices);
        self.classify_and_attach(edges);
        if edge_batch > 0 {
            self.rebuild_mirrors();
        }
        debug!(
            fid = self.opts.fid.0,
            alive = self.alive_inner,
            edges = self.edge_num,
            "fragment.insert"
        );
    }

    /// Overwrites payloads of vertices and edges already present. An edge
    /// absent from the store is left untouched: update assumes existence
    /// and does not create, unlike insert.
    pub fn update(&mut self, vertices: Vec<(Gid, Value)>, edges: Vec<(Gid, Gid, Value)>) {
        for (gid, data) in vertices {
            if let Some(lid) = self.gid_to_lid(gid) {
                if !self.is_alive(lid) {
                    continue;
                }
                match self.outer_index_of(lid) {
                    None => self.vdata[lid as usize] = data,
                    Some(k) => {
                        if self.opts.mode == super::PartitionMode::Duplicated {
                            self.odata[k as usize] = data;
                        }
                    }
                }
            }
        }
        for (src, dst, data) in edges {
            let (Some(su), Some(sv)) = (self.gid_to_lid(src), self.gid_to_lid(dst)) else {
                continue;
            };
            self.update_edge_payload(su, sv, data);
        }
    }

    fn update_edge_payload(&mut self, su: u64, sv: u64, data: Value) {
        if !self.opts.directed {
            if let Some(handle) = self.handle(su, Dir::Out) {
                if let Some(payload) = self.slots.get_mut(handle, sv) {
                    *payload = data.clone();
                }
            }
            if su != sv {
                if let Some(handle) = self.handle(sv, Dir::Out) {
                    if let Some(payload) = self.slots.get_mut(handle, su) {
                        *payload = data;
                    }
                }
            }
            return;
        }
        if self.opts.strategy.has_out() {
            if let Some(handle) = self.handle(su, Dir::Out) {
                if let Some(payload) = self.slots.get_mut(handle, sv) {
                    *payload = data.clone();
                }
            }
        }
        if self.opts.strategy.has_in() {
            if let Some(handle) = self.handle(sv, Dir::In) {
                if let Some(payload) = self.slots.get_mut(handle, su) {
                    *payload = data;
                }
            }
        }
    }

    /// Deletes vertices and edges. Vertex deletion frees the vertex's own
    /// slots, then one scan over every other alive vertex's slots removes
    /// entries pointing at the deleted set; adjacency entries carry no
    /// back-reference, so the scan cost is proportional to the remaining
    /// edge count.
    pub fn delete(&mut self, vertices: Vec<Gid>, edges: Vec<(Gid, Gid)>) {
        for (src, dst) in edges {
            let (Some(su), Some(sv)) = (self.gid_to_lid(src), self.gid_to_lid(dst)) else {
                continue;
            };
            self.delete_edge(su, sv);
        }

        let mut doomed: Vec<u64> = Vec::new();
        for gid in vertices {
            let Some(stored) = self.gid_to_lid(gid) else {
                continue;
            };
            if self.is_alive(stored) {
                doomed.push(stored);
            }
        }
        if doomed.is_empty() {
            return;
        }
        let doomed_set: FxHashSet<u64> = doomed.iter().copied().collect();

        // Pass 1: clear each doomed vertex's own slots, then flip liveness.
        // The handle resets before the bit.
        for &stored in &doomed {
            self.clear_own_slots(stored);
            match self.outer_index_of(stored) {
                None => {
                    let idx = stored as usize;
                    self.vdata[idx] = Value::Null;
                    self.inner_alive.clear(idx);
                    self.inner_tomb.set(idx);
                    self.alive_inner -= 1;
                }
                Some(k) => {
                    let idx = k as usize;
                    self.odata[idx] = Value::Null;
                    self.outer_alive.clear(idx);
                    self.outer_tomb.set(idx);
                    self.alive_outer -= 1;
                }
            }
        }

        // Pass 2: sweep every still-alive vertex's slots for entries that
        // point at the deleted set, then recount. The recount walks the
        // remaining entries once, the same order of cost as the sweep
        // itself, and keeps the counter exact for every strategy and
        // partition mode.
        let mut swept = 0usize;
        for stored in self.materialized_ids_vec() {
            if doomed_set.contains(&stored) || !self.is_alive(stored) {
                continue;
            }
            if let Some(handle) = self.handle(stored, Dir::Out) {
                swept += self
                    .slots
                    .remove_matching(handle, |nbr| doomed_set.contains(&nbr));
            }
            if self.opts.directed {
                if let Some(handle) = self.handle(stored, Dir::In) {
                    swept += self
                        .slots
                        .remove_matching(handle, |nbr| doomed_set.contains(&nbr));
                }
            }
        }
        self.recount();
        debug!(
            fid = self.opts.fid.0,
            deleted = doomed.len(),
            swept,
            "fragment.delete.scan"
        );
        self.rebuild_mirrors();
    }

    fn clear_own_slots(&mut self, stored: u64) {
        if let Some(handle) = self.handle(stored, Dir::Out) {
            self.slots.remove_all(handle);
            *self.handle_entry(stored, Dir::Out) = None;
        }
        if self.opts.directed {
            if let Some(handle) = self.handle(stored, Dir::In) {
                self.slots.remove_all(handle);
                *self.handle_entry(stored, Dir::In) = None;
            }
        }
    }

    fn delete_edge(&mut self, su: u64, sv: u64) {
        let mut removed = 0usize;
        if !self.opts.directed {
            if let Some(handle) = self.handle(su, Dir::Out) {
                removed += self.slots.remove_one(handle, sv);
            }
            if su != sv {
                if let Some(handle) = self.handle(sv, Dir::Out) {
                    removed += self.slots.remove_one(handle, su);
                }
            }
        } else {
            if self.opts.strategy.has_out() {
                if let Some(handle) = self.handle(su, Dir::Out) {
                    removed += self.slots.remove_one(handle, sv);
                }
            }
            if self.opts.strategy.has_in() {
                if let Some(handle) = self.handle(sv, Dir::In) {
                    removed += self.slots.remove_one(handle, su);
                }
            }
        }
        if removed > 0 {
            self.edge_num -= 1;
            if su == sv {
                self.selfloops.remove(&su);
            }
        }
    }

    /// Applies a line batch of vertex mutations. Malformed lines and
    /// non-vertex records are logged and skipped; unknown oids in
    /// Update/Delete batches are skipped silently. Returns how many records
    /// were applied.
    pub fn modify_vertices(
        &mut self,
        lines: &[&str],
        kind: ModifyKind,
        vmap: &mut GlobalVertexMap,
    ) -> Result<usize> {
        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for line in lines {
            let record = match parse_line(line) {
                Ok(MutationRecord::Vertex { oid, data }) => (oid, data),
                Ok(MutationRecord::Edge { .. }) => {
                    warn!(line = %line, "ingest.record.kind_mismatch");
                    continue;
                }
                Err(err) => {
                    warn!(line = %line, error = %err, "ingest.parse.skip");
                    continue;
                }
            };
            let (oid, data) = record;
            match kind {
                ModifyKind::Insert => {
                    let home = vmap.partition_of(&oid);
                    let gid = vmap.add_vertex(home, oid)?;
                    inserts.push((gid, data));
                }
                ModifyKind::Update => {
                    if let Some(gid) = vmap.get_gid(&oid) {
                        updates.push((gid, data));
                    }
                }
                ModifyKind::Delete => {
                    if let Some(gid) = vmap.get_gid(&oid) {
                        deletes.push(gid);
                    }
                }
            }
        }
        let applied = inserts.len() + updates.len() + deletes.len();
        match kind {
            ModifyKind::Insert => self.insert(inserts, Vec::new()),
            ModifyKind::Update => self.update(updates, Vec::new()),
            ModifyKind::Delete => self.delete(deletes, Vec::new()),
        }
        Ok(applied)
    }

    /// Applies a line batch of edge mutations. Insert registers unseen
    /// endpoint oids with the vertex map; Update/Delete skip edges whose
    /// endpoints the map does not know. Returns how many records were
    /// applied.
    pub fn modify_edges(
        &mut self,
        lines: &[&str],
        kind: ModifyKind,
        vmap: &mut GlobalVertexMap,
    ) -> Result<usize> {
        let mut inserts = Vec::new();
        let mut vertex_inserts: Vec<(Gid, Value)> = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for line in lines {
            let record = match parse_line(line) {
                Ok(MutationRecord::Edge { src, dst, data }) => (src, dst, data),
                Ok(MutationRecord::Vertex { .. }) => {
                    warn!(line = %line, "ingest.record.kind_mismatch");
                    continue;
                }
                Err(err) => {
                    warn!(line = %line, error = %err, "ingest.parse.skip");
                    continue;
                }
            };
            let (src, dst, data) = record;
            match kind {
                ModifyKind::Insert => {
                    let src_gid = vmap.add_vertex(vmap.partition_of(&src), src)?;
                    let dst_gid = vmap.add_vertex(vmap.partition_of(&dst), dst)?;
                    // Endpoints assigned past the current inner range are new
                    // vertices this batch introduces; grow the range for them
                    // without disturbing payloads of vertices already stored.
                    for gid in [src_gid, dst_gid] {
                        if self.is_inner_gid(gid) && self.coder.lid(gid) >= self.ivnum {
                            vertex_inserts.push((gid, Value::Null));
                        }
                    }
                    inserts.push((src_gid, dst_gid, data));
                }
                ModifyKind::Update => {
                    if let (Some(src_gid), Some(dst_gid)) =
                        (vmap.get_gid(&src), vmap.get_gid(&dst))
                    {
                        updates.push((src_gid, dst_gid, data));
                    }
                }
                ModifyKind::Delete => {
                    if let (Some(src_gid), Some(dst_gid)) =
                        (vmap.get_gid(&src), vmap.get_gid(&dst))
                    {
                        deletes.push((src_gid, dst_gid));
                    }
                }
            }
        }
        let applied = inserts.len() + updates.len() + deletes.len();
        match kind {
            ModifyKind::Insert => self.insert(vertex_inserts, inserts),
            ModifyKind::Update => self.update(Vec::new(), updates),
            ModifyKind::Delete => self.delete(Vec::new(), deletes),
        }
        Ok(applied)
    }
}

//! Source records and the layer map.
//!
//! Each registered source owns exactly one record: transform, layer, filter
//! binding and slot. The layer map lists source ids per z-index; ids inside a
//! layer keep their insertion order, so render order is ascending by layer and
//! stable within a layer. Every mutation keeps records and layer map in step.

use crate::filters::FilterHandle;
use crate::frame::FrameBuffer;
use crate::io::{Source, SourceId};
use crate::mixer::config::StaleFramePolicy;
use glam::Mat4;
use std::collections::{BTreeMap, HashMap};
use std::sync::Weak;
use std::time::{Duration, Instant};

pub const DEFAULT_LAYER: i32 = 0;

/// Why a pushed frame was not stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushRejection {
    #[error("{0} is not registered")]
    UnknownSource(SourceId),
    #[error("{id} declared {expected}-byte frames, got {got} bytes")]
    LengthMismatch {
        id: SourceId,
        expected: usize,
        got: usize,
    },
}

/// Most recent frame pushed by a source.
#[derive(Default)]
struct Slot {
    frame: Option<FrameBuffer>,
    pts: Duration,
    updated_at: Option<Instant>,
}

struct SourceRecord {
    probe: Option<Weak<dyn Source>>,
    transform: Mat4,
    z_index: i32,
    filter: Option<FilterHandle>,
    expected_len: usize,
    slot: Slot,
}

impl SourceRecord {
    fn is_alive(&self) -> bool {
        self.probe
            .as_ref()
            .map_or(true, |probe| probe.strong_count() > 0)
    }
}

/// One source to draw in a pass.
#[derive(Clone)]
pub struct DrawItem {
    pub id: SourceId,
    pub z_index: i32,
    pub frame: FrameBuffer,
    /// Timestamp the producer attached to `frame`.
    pub pts: Duration,
    pub transform: Mat4,
    pub filter: Option<FilterHandle>,
}

/// Everything a pass needs, copied out so the table lock can be released.
#[derive(Default)]
pub struct Snapshot {
    /// Sources with a frame, back to front.
    pub items: Vec<DrawItem>,
    /// Every filter currently associated with a source.
    pub filters: Vec<FilterHandle>,
    /// Registered sources, drawn or not.
    pub registered: usize,
    /// Sources removed because their owner dropped them.
    pub pruned: Vec<SourceId>,
    /// Frames cleared by the stale-frame policy. Drop outside the lock.
    pub expired: Vec<FrameBuffer>,
}

#[derive(Default)]
pub struct SourceTable {
    next_id: u64,
    records: HashMap<SourceId, SourceRecord>,
    layers: BTreeMap<i32, Vec<SourceId>>,
}

impl SourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record with identity transform on the default layer.
    ///
    /// `expected_len > 0` fixes the byte length every pushed frame must have.
    pub fn insert(&mut self, probe: Option<Weak<dyn Source>>, expected_len: usize) -> SourceId {
        self.next_id += 1;
        let id = SourceId::new(self.next_id);
        self.records.insert(
            id,
            SourceRecord {
                probe,
                transform: Mat4::IDENTITY,
                z_index: DEFAULT_LAYER,
                filter: None,
                expected_len,
                slot: Slot::default(),
            },
        );
        self.layers.entry(DEFAULT_LAYER).or_default().push(id);
        id
    }

    /// Remove a source and everything attached to it.
    ///
    /// Returns the removed frame and filter so the caller can drop them
    /// outside any lock, or `None` if the source was unknown.
    pub fn remove(&mut self, id: SourceId) -> Option<(Option<FrameBuffer>, Option<FilterHandle>)> {
        let record = self.records.remove(&id)?;
        self.leave_layer(id, record.z_index);
        Some((record.slot.frame, record.filter))
    }

    fn leave_layer(&mut self, id: SourceId, z_index: i32) {
        if let Some(members) = self.layers.get_mut(&z_index) {
            members.retain(|member| *member != id);
            if members.is_empty() {
                self.layers.remove(&z_index);
            }
        }
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the filter association, returning the previous one.
    pub fn set_filter(
        &mut self,
        id: SourceId,
        filter: Option<FilterHandle>,
    ) -> Result<Option<FilterHandle>, PushRejection> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(PushRejection::UnknownSource(id))?;
        Ok(std::mem::replace(&mut record.filter, filter))
    }

    pub fn filter(&self, id: SourceId) -> Option<FilterHandle> {
        self.records.get(&id).and_then(|r| r.filter.clone())
    }

    /// Move a source to `z_index`, appending it to that layer.
    pub fn set_layer(&mut self, id: SourceId, z_index: i32) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        let old = std::mem::replace(&mut record.z_index, z_index);
        if old != z_index {
            self.leave_layer(id, old);
            self.layers.entry(z_index).or_default().push(id);
        }
        true
    }

    pub fn layer(&self, id: SourceId) -> Option<i32> {
        self.records.get(&id).map(|r| r.z_index)
    }

    pub fn set_transform(&mut self, id: SourceId, transform: Mat4) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn transform(&self, id: SourceId) -> Option<Mat4> {
        self.records.get(&id).map(|r| r.transform)
    }

    /// Overwrite the slot of `id` with `frame`.
    ///
    /// Returns the frame that was replaced, if any, for the caller to drop
    /// once the lock is released.
    pub fn store(
        &mut self,
        id: SourceId,
        frame: FrameBuffer,
        pts: Duration,
        now: Instant,
    ) -> Result<Option<FrameBuffer>, PushRejection> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(PushRejection::UnknownSource(id))?;
        if record.expected_len > 0 && frame.byte_len() != record.expected_len {
            return Err(PushRejection::LengthMismatch {
                id,
                expected: record.expected_len,
                got: frame.byte_len(),
            });
        }
        record.slot.pts = pts;
        record.slot.updated_at = Some(now);
        Ok(record.slot.frame.replace(frame))
    }

    pub fn has_frame(&self, id: SourceId) -> bool {
        self.records
            .get(&id)
            .is_some_and(|r| r.slot.frame.is_some())
    }

    /// Source ids per layer, back to front.
    pub fn layers(&self) -> Vec<(i32, Vec<SourceId>)> {
        self.layers
            .iter()
            .map(|(z, ids)| (*z, ids.clone()))
            .collect()
    }

    /// Whether any layer lists `id`.
    pub fn in_layer_map(&self, id: SourceId) -> bool {
        self.layers.values().any(|ids| ids.contains(&id))
    }

    /// Drop records whose source no longer exists.
    pub fn prune_dead(&mut self) -> Vec<SourceId> {
        let dead: Vec<SourceId> = self
            .records
            .iter()
            .filter(|(_, record)| !record.is_alive())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.remove(*id);
        }
        dead
    }

    /// Copy out what the next pass draws.
    pub fn snapshot(&mut self, now: Instant, policy: StaleFramePolicy) -> Snapshot {
        let pruned = self.prune_dead();
        let mut expired = Vec::new();

        if let StaleFramePolicy::DropAfter(bound) = policy {
            for record in self.records.values_mut() {
                let stale = record
                    .slot
                    .updated_at
                    .is_some_and(|at| now.saturating_duration_since(at) > bound);
                if stale {
                    if let Some(frame) = record.slot.frame.take() {
                        expired.push(frame);
                    }
                }
            }
        }

        let mut items = Vec::with_capacity(self.records.len());
        for (z_index, ids) in &self.layers {
            for id in ids {
                let Some(record) = self.records.get(id) else {
                    continue;
                };
                let Some(frame) = &record.slot.frame else {
                    continue;
                };
                items.push(DrawItem {
                    id: *id,
                    z_index: *z_index,
                    frame: frame.clone(),
                    pts: record.slot.pts,
                    transform: record.transform,
                    filter: record.filter.clone(),
                });
            }
        }

        let filters = self
            .records
            .values()
            .filter_map(|record| record.filter.clone())
            .collect();

        Snapshot {
            items,
            filters,
            registered: self.records.len(),
            pruned,
            expired,
        }
    }
}

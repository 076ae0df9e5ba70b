use crate::track::{Track, TrackId};
use std::collections::HashMap;

/// Contiguous track storage with stable [TrackId] handles.
///
/// Ids are handed out monotonically by the tracker and never reused, so a
/// stale id simply fails to resolve after its track is removed.
#[derive(Debug, Default)]
pub struct TrackArena {
    tracks: Vec<Track>,
    slots: HashMap<TrackId, usize>,
}

impl TrackArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tracks: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, track: Track) {
        let id = track.id();
        match self.slots.get(&id) {
            Some(&slot) => self.tracks[slot] = track,
            None => {
                self.slots.insert(id, self.tracks.len());
                self.tracks.push(track);
            }
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        let slot = *self.slots.get(&id)?;
        self.tracks.get(slot)
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        let slot = self.slots.remove(&id)?;
        let removed = self.tracks.swap_remove(slot);
        if let Some(moved) = self.tracks.get(slot) {
            self.slots.insert(moved.id(), slot);
        }
        Some(removed)
    }

    /// Drops every track in the deleted state and returns their ids.
    pub fn reap(&mut self) -> Vec<TrackId> {
        let dead: Vec<TrackId> = self
            .tracks
            .iter()
            .filter(|track| !track.is_live())
            .map(|track| track.id())
            .collect();
        for &id in &dead {
            self.remove(id);
        }
        dead
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }

    pub fn as_slice(&self) -> &[Track] {
        &self.tracks
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.slots.clear();
    }
}

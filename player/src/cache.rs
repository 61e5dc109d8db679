//! Bounded look-ahead store of decoded frames. The window is a sliding range
//! over frame ids, so eviction is a range scan rather than any LRU bookkeeping.

use std::sync::Arc;

use container::{Frame, FrameContent};
use litemap::LiteMap;

/// Decoded frames kept at once; only ids in `[current, current + CACHE_SIZE)`
/// survive an eviction pass.
pub const CACHE_SIZE: u64 = 10;

#[derive(Clone)]
pub enum CachedFrame {
    Ready {
        info: Frame,
        content: Arc<FrameContent>,
    },
    /// The frame could not be decoded; playback steps over it.
    Failed,
}

#[derive(Default)]
pub struct FrameCache {
    entries: LiteMap<u64, CachedFrame>,
}

impl FrameCache {
    pub fn get(&self, frame_id: u64) -> Option<&CachedFrame> {
        self.entries.get(&frame_id)
    }

    pub fn insert(&mut self, frame_id: u64, entry: CachedFrame) {
        self.entries.insert(frame_id, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evict_outside(&mut self, window_start: u64) {
        let window = window_start..window_start.saturating_add(CACHE_SIZE);
        let stale: Vec<u64> = self
            .entries
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !window.contains(id))
            .collect();
        for id in stale {
            self.entries.remove(&id);
        }
    }

    /// Lowest id inside the window that has not been loaded yet.
    pub fn first_missing(&self, window_start: u64, frame_count: u64) -> Option<u64> {
        let window_end = window_start.saturating_add(CACHE_SIZE).min(frame_count);
        (window_start..window_end).find(|id| self.entries.get(id).is_none())
    }
}

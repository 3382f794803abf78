//! Engine-scoped source registry.
//!
//! Sources are keyed owner → source id and tagged with their capability.
//! The lock is only ever held to snapshot `Arc`s; mixing and compositing
//! run against the snapshots.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Audio,
    AsyncVideo,
    SyncVideo,
    AudioVideo,
}

impl SourceKind {
    pub const fn has_audio(self) -> bool {
        matches!(self, SourceKind::Audio | SourceKind::AudioVideo)
    }

    pub const fn has_video(self) -> bool {
        matches!(
            self,
            SourceKind::AsyncVideo | SourceKind::SyncVideo | SourceKind::AudioVideo
        )
    }

    /// Combined sources deliver frames asynchronously; only pure sync
    /// sources take the texture path.
    pub const fn is_async_video(self) -> bool {
        matches!(self, SourceKind::AsyncVideo | SourceKind::AudioVideo)
    }
}

#[derive(Default)]
pub struct SourceRegistry {
    sources: Mutex<IndexMap<u64, IndexMap<u64, (SourceKind, Arc<Source>)>>>,
}

impl SourceRegistry {
    pub fn new() -> SourceRegistry {
        SourceRegistry::default()
    }

    pub fn register(&self, owner: u64, id: u64, kind: SourceKind, source: Arc<Source>) {
        let mut sources = self.sources.lock();
        sources.entry(owner).or_default().insert(id, (kind, source));
    }

    pub fn unregister(&self, owner: u64, id: u64) -> Option<Arc<Source>> {
        let mut sources = self.sources.lock();
        let owned = sources.get_mut(&owner)?;
        let removed = owned.shift_remove(&id).map(|(_, source)| source);
        if owned.is_empty() {
            sources.shift_remove(&owner);
        }
        removed
    }

    pub fn audio_sources(&self) -> Vec<Arc<Source>> {
        self.snapshot(SourceKind::has_audio)
    }

    pub fn video_sources(&self) -> Vec<Arc<Source>> {
        self.snapshot(SourceKind::has_video)
    }

    fn snapshot(&self, filter: impl Fn(SourceKind) -> bool) -> Vec<Arc<Source>> {
        let sources = self.sources.lock();
        let mut out = Vec::new();
        for owned in sources.values() {
            for (kind, source) in owned.values() {
                if filter(*kind) {
                    out.push(source.clone());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.sources.lock().values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.lock().values().all(IndexMap::is_empty)
    }
}

//! Current-metadata cell: one writer, many lock-free readers.
//!
//! The poller replaces the whole value atomically; session writers grab a
//! snapshot once per interval boundary and use it for the entire splice, so
//! a reader can never observe a partially written string.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One published metadata value.
#[derive(Debug)]
pub struct PublishedMeta {
    /// The ICY text, e.g. `StreamTitle='Artist - Title';`.
    pub icy_text: String,
    /// Moment of the last successful refresh.
    pub updated_at: DateTime<Utc>,
}

/// Atomic slot holding the station's current metadata.
#[derive(Default)]
pub struct MetaCell {
    current: ArcSwapOption<PublishedMeta>,
}

impl MetaCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published value.
    pub fn publish(&self, icy_text: String) {
        self.current.store(Some(Arc::new(PublishedMeta {
            icy_text,
            updated_at: Utc::now(),
        })));
    }

    /// Drop the published value; subsequent ICY blocks become `[0x00]`.
    pub fn clear(&self) {
        self.current.store(None);
    }

    /// Snapshot of the current value, if any.
    pub fn load(&self) -> Option<Arc<PublishedMeta>> {
        self.current.load_full()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}

//! Song handle
//!
//! The engine's view of a queue entry: an identifier, a URI the input
//! layer can open, and the metadata known before decoding starts.

use std::time::Duration;

use uuid::Uuid;

use crate::tag::Tag;

/// One playable song.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub id: Uuid,
    pub uri: String,
    pub tag: Tag,

    /// Duration as known to the library; the decoder may correct it.
    pub duration: Option<Duration>,
}

impl Song {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), uri: uri.into(), tag: Tag::new(), duration: None }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

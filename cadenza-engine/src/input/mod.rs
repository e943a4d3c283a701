//! Input streams
//!
//! The decoder pulls bytes through the [`InputStream`] trait; the
//! daemon's input layer (local files, HTTP, archives) provides the
//! implementations. A file-backed and an in-memory implementation are
//! bundled for local playback and tests.

mod file;
mod memory;

pub use file::FileInputStream;
pub use memory::MemoryInputStream;

use crate::error::{Error, Result};

/// A readable, optionally seekable source of encoded audio.
///
/// `read` returning 0 means end of stream. Implementations block until
/// data is available; "would block" is handled inside the
/// implementation, not surfaced as an error.
pub trait InputStream: Send + Sync {
    /// The URI this stream was opened from.
    fn uri(&self) -> &str;

    /// Read into `buf`, returning the number of bytes read; 0 at EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reposition to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> Result<()>;

    fn is_eof(&self) -> bool;

    fn is_seekable(&self) -> bool;

    /// Total size in bytes, when known.
    fn size(&self) -> Option<u64>;

    /// MIME type, when known.
    fn mime(&self) -> Option<&str> {
        None
    }
}

/// Open a local source by URI. Network schemes belong to the daemon's
/// input layer and are rejected here.
pub fn open_local(uri: &str) -> Result<Box<dyn InputStream>> {
    if uri.contains("://") && !uri.starts_with("file://") {
        return Err(Error::InputOpen {
            uri: uri.to_string(),
            message: "scheme not handled by the local input layer".into(),
        });
    }

    let path = uri.strip_prefix("file://").unwrap_or(uri);
    Ok(Box::new(FileInputStream::open(path, uri)?))
}

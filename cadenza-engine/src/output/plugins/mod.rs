//! Bundled output plugins

mod cpal;
mod null;

pub use self::cpal::CpalOutput;
pub use self::null::NullOutput;

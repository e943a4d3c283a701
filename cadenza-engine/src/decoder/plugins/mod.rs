//! Bundled decoder plugins

mod symphonia;

pub use self::symphonia::SymphoniaDecoderPlugin;

//! Audio buffer types.
//!
//! - [AudioBus]: planar, fixed-shape audio storage reused across render quanta.
pub mod audio;

pub use audio::AudioBus;

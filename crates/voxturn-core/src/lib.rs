//! voxturn-core — Pure types, the voice turn state machine, and response normalization.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod error;
pub mod media;
pub mod normalize;
pub mod prompt;
pub mod status;
pub mod turn;
pub mod types;
pub mod wav;

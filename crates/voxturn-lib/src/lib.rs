//! voxturn-lib — Voice turn engine.
//!
//! Microphone capture, turn posting, clip playback, and the controller that
//! sequences them. Depends on voxturn-core for pure types, the turn state
//! machine, and response normalization.

pub mod capture;
pub mod controller;
pub mod playback;
pub mod text;
pub mod transport;

// Re-export voxturn-core for convenience
pub use voxturn_core;

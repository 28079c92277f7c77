//! Noise-suppression / voice-activity abstraction layer for VoxFlow.
//!
//! The engine is an injected resource handle ([`DenoiseEngine`]); the
//! pipeline talks to it only through [`stage::PreprocessStage`], which owns
//! the degrade-gracefully policy for engine failures.

pub mod energy;
pub mod engine;
pub mod stage;

pub use energy::EnergyDenoiser;
pub use engine::{DenoiseEngine, DenoiseError, DenoiseOutput};
pub use stage::{CleanedAudio, PreprocessStage};

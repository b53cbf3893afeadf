//! # dissforge common library
//!
//! Shared code for the dissforge crates:
//! - Error type and result alias
//! - TOML configuration and root folder resolution
//! - Content fingerprints (cache keys)
//! - Generation events and the broadcast `EventBus`
//! - Fade curves used for line crossfades and beat fade-outs

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod fingerprint;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use fingerprint::{Fingerprint, FingerprintBuilder};

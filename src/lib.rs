// Crate surface is organized by layer: `foundation`, `domain`, `application`, `infrastructure`.
pub mod application;
pub mod domain;
pub mod foundation;
pub mod infrastructure;
pub use foundation::{MixerError, Result};

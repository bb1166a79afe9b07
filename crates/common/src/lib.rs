//! Common types shared by the pulsarctl workspace crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;

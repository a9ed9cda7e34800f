//! Shared types for the Tidepool token SDK

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;

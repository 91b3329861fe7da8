//! Runtime options for Tessera.
//!
//! Options are registered once at startup and read through a tiered store:
//! local memory, an optional shared cache and a durable database, with
//! static configuration and registered defaults as the final fallback.

pub mod backends;
pub mod defaults;
pub mod error;
pub mod flags;
pub mod key;
pub mod manager;
pub mod static_config;
pub mod store;
pub mod types;

pub use backends::*;
pub use error::*;
pub use flags::*;
pub use key::*;
pub use manager::*;
pub use static_config::*;
pub use store::*;
pub use types::*;

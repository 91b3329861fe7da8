//! Transaction name clustering.
//!
//! URL transaction names are sampled per project, periodically clustered into
//! wildcard rules with a segment trie, and the rules are stored per project
//! with the time they were last produced.

pub mod datasource;
pub mod error;
pub mod project;
pub mod rules;
pub mod tasks;
pub mod tree;

pub use datasource::*;
pub use error::*;
pub use project::*;
pub use rules::*;
pub use tasks::*;
pub use tree::*;

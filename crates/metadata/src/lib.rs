//! Entity metadata consumed by the fxq compiler.
//!
//! The compiler never talks to a remote platform directly; it asks a
//! [`MetadataProvider`] for the attribute list of each entity it meets in a
//! query. [`Catalog`] is the in-memory/JSON implementation and
//! [`MetadataCache`] memoizes any provider.

pub mod catalog;
pub mod provider;

pub use catalog::*;
pub use provider::*;

//! Value types shared across the rdflink connection layers.
//!
//! Types in this crate are:
//! - **Pure data**: no behavior beyond parsing, accessors and serde
//! - **Opaque to the runtime**: query text and answers are carried, never interpreted
//!
//! The connection runtime and the transaction coordinator are built on top of
//! these types in `rdflink-runtime` and `rdflink`.

pub mod endpoint;
pub mod query;

pub use endpoint::Endpoint;
pub use query::*;

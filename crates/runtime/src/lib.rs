//! rdflink runtime - sessions, connections and the session cache
//!
//! This crate provides the connection layer between store commands and the
//! backend sessions that run them:
//!
//! - **Sessions**: the backend contract, resolved per URI scheme by a finder
//! - **Session cache**: idle sessions per normalized endpoint, plus the in-use set
//! - **Connection**: serialized execution, cancellation and proxy execution
//! - **Factory**: endpoint normalization, cache lookup and session reclamation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │     rdflink      │  Commands and the transaction coordinator
//! └────────┬─────────┘
//!          │ new_connection(endpoint)
//! ┌────────▼─────────┐
//! │  rdflink-runtime │  This crate
//! │  ┌────────────┐  │
//! │  │  Factory   │  │  Normalize, look up, validate
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │   Cache    │  │  Idle + in-use sessions
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │ Connection │  │  One operation at a time
//! │  └────────────┘  │
//! └────────┬─────────┘
//!          │ Session trait
//! ┌────────▼─────────┐
//! │     backend      │  RPC, local, ...
//! └──────────────────┘
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod locality;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export key types at crate root
pub use cache::{SessionCache, SessionKey};
pub use cancel::CancelToken;
pub use config::{ConnectionConfig, ReaperConfig};
pub use connection::Connection;
pub use error::{Error, Result};
pub use factory::{ConnectionFactory, ReapReport};
pub use locality::Locality;
pub use session::{OpenedSession, Session, SessionFactory, SessionFactoryFinder};

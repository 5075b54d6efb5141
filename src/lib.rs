//! # Polar Host
//!
//! Host-side binding for the Polar policy engine. The engine evaluates policy
//! rules; this crate lets Rust objects take part in that evaluation.
//!
//! ## Features
//!
//! - **Value Marshaling**: Convert Rust values to engine terms and back
//! - **Class Registry**: Explicit method tables with specializer ordering
//! - **External Dispatch**: Answer the engine's attribute, method, `isa` and comparison questions
//! - **Query Driver**: Lazy, fused iteration over solutions with exactly-once cleanup
//! - **Error Translation**: One closed error taxonomy for every failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use polar_host::{Class, HostValue, PolicySession};
//!
//! struct User {
//!     role: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = PolicySession::builder()
//!         .with_class(
//!             Class::builder::<User>("User")
//!                 .add_attribute_getter("role", |u: &User| u.role.clone())
//!                 .build(),
//!         )
//!         .with_policy(r#"allow(actor, "read", _resource) if actor.role = "admin";"#)
//!         .build()?;
//!
//!     let admin = HostValue::instance(User { role: "admin".into() });
//!     let read = HostValue::String("read".into());
//!     let allowed = session.is_allowed(admin, read, HostValue::Integer(1))?;
//!     println!("allowed: {}", allowed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod host;
pub mod telemetry;
pub mod term;

// Re-export main types for convenience
pub use api::{PolicySession, PolicySessionBuilder, Query, QueryState, ResultSet};
pub use config::SessionConfig;
pub use engine::{Engine, NativeQuery, Source};
pub use error::{Error, ErrorContext, Result};
pub use host::{Args, Class, ClassBuilder, FromHostValue, HostValue, Instance, IntoHostValue};
pub use term::{QueryEvent, Term};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

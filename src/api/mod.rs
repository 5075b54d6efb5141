//! Public API for the host binding.
//!
//! [`PolicySession`] loads policy and registers host classes and instances;
//! each evaluation returns a [`Query`] that yields [`ResultSet`]s.

mod query;
mod result;
mod session;

pub use query::{Query, QueryState};
pub use result::ResultSet;
pub use session::{PolicySession, PolicySessionBuilder, SessionMetrics};

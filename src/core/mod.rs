//! Core dispatch logic.

mod dispatcher;

pub use dispatcher::{Answer, Dispatcher};

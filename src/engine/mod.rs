//! The seam between the host layer and the native engine.
//!
//! [`Engine`] and [`NativeQuery`] mirror the engine's C ABI one call per method.
//! The `native` feature provides [`NativeEngine`], which implements them over
//! the real library; tests drive the host layer with a scripted engine instead.

#[cfg(feature = "native")]
mod native;
#[cfg(test)]
pub(crate) mod scripted;

#[cfg(feature = "native")]
pub use native::NativeEngine;

use crate::term::{Bindings, QueryEvent, Term};
use serde::Serialize;
use std::fmt;

/// A policy source handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// Policy text
    pub src: String,
    /// File the text came from, if any
    pub filename: Option<String>,
}

impl Source {
    /// Source text without a file name.
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            filename: None,
        }
    }

    /// Source text read from a file.
    pub fn from_file(src: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            filename: Some(filename.into()),
        }
    }
}

/// Classification of a native error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeErrorKind {
    /// Policy text failed to parse
    Parse,
    /// Policy failed validation
    Validation,
    /// Error raised while evaluating
    Runtime,
    /// Engine-internal failure
    Operational,
    /// The host reported an application error into the engine
    Application,
    /// Any kind this crate does not recognise
    Unknown(String),
}

/// An error payload reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeError {
    /// Classification
    pub kind: NativeErrorKind,
    /// Formatted message from the engine
    pub message: String,
}

impl NativeError {
    /// Create a native error.
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Parse the engine's JSON error payload.
    ///
    /// The payload looks like `{"kind": {"Runtime": {"Application": {...}}}, "formatted": "..."}`.
    /// Anything that does not fit this shape is kept verbatim as an unknown error.
    pub fn from_json(payload: &str) -> Self {
        let parsed: serde_json::Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => return Self::new(NativeErrorKind::Unknown("unparsed".into()), payload),
        };

        let message = parsed
            .get("formatted")
            .and_then(|m| m.as_str())
            .unwrap_or(payload)
            .to_string();

        let kind = match parsed.get("kind") {
            Some(serde_json::Value::Object(kind)) => match kind.iter().next() {
                Some((name, detail)) => classify(name, Some(detail)),
                None => NativeErrorKind::Unknown(String::new()),
            },
            Some(serde_json::Value::String(name)) => classify(name, None),
            _ => NativeErrorKind::Unknown(String::new()),
        };

        Self::new(kind, message)
    }
}

fn classify(name: &str, detail: Option<&serde_json::Value>) -> NativeErrorKind {
    match name {
        "Parse" => NativeErrorKind::Parse,
        "Validation" => NativeErrorKind::Validation,
        "Operational" => NativeErrorKind::Operational,
        "Runtime" => {
            let application = detail
                .and_then(|d| d.as_object())
                .map(|d| d.contains_key("Application"))
                .unwrap_or(false);
            if application {
                NativeErrorKind::Application
            } else {
                NativeErrorKind::Runtime
            }
        }
        other => NativeErrorKind::Unknown(other.to_string()),
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for NativeError {}

/// A loaded policy engine.
///
/// Implementations must allow concurrent queries from several threads.
pub trait Engine: Send + Sync {
    /// Load policy sources.
    fn load(&self, sources: &[Source]) -> Result<(), NativeError>;

    /// Drop all loaded rules, keeping constants.
    fn clear_rules(&self) -> Result<(), NativeError>;

    /// Bind a global constant visible to policy code.
    fn register_constant(&self, name: &str, value: &Term) -> Result<(), NativeError>;

    /// Allocate an instance id from the engine's id space.
    fn new_instance_id(&self) -> u64;

    /// Start a query from a term, with initial variable bindings.
    fn new_query(&self, query: &Term, bindings: &Bindings)
        -> Result<Box<dyn NativeQuery>, NativeError>;

    /// Start a query from policy-language text, with initial variable bindings.
    fn new_query_from_str(
        &self,
        query: &str,
        bindings: &Bindings,
    ) -> Result<Box<dyn NativeQuery>, NativeError>;
}

/// One in-flight native query.
///
/// Exactly one thread may drive a query at a time; every method takes `&mut self`.
pub trait NativeQuery: Send {
    /// Poll for the next protocol event.
    fn next_event(&mut self) -> Result<QueryEvent, NativeError>;

    /// Answer a pending call. `None` means "no result" (e.g. an exhausted iterator).
    fn answer_call(&mut self, call_id: u64, result: Option<&Term>) -> Result<(), NativeError>;

    /// Report a host-side failure for the pending call.
    fn answer_application_error(&mut self, message: &str) -> Result<(), NativeError>;

    /// Release the native query.
    fn free(&mut self);
}

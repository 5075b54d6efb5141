//! Protocol events emitted by the engine while a query runs.

use super::{Bindings, Symbol, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comparison operators the engine delegates to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Leq,
    /// `>`
    Gt,
    /// `>=`
    Geq,
}

/// One step of the query protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryEvent {
    /// No further events
    Done {
        /// Whether the query produced any result
        result: bool,
    },

    /// One solution
    Result {
        /// Bindings of the query's variables
        bindings: Bindings,
        /// Optional engine trace, passed through untouched
        #[serde(default)]
        trace: Option<serde_json::Value>,
    },

    /// Construct a host instance and register it under `instance_id`
    MakeExternal {
        /// Id chosen by the engine
        instance_id: u64,
        /// Constructor call naming the class
        constructor: Term,
    },

    /// Attribute lookup (`args: None`) or method call
    ExternalCall {
        /// Id to answer with
        call_id: u64,
        /// Receiver
        instance: Term,
        /// Member name
        attribute: Symbol,
        /// Positional arguments for method calls
        #[serde(default)]
        args: Option<Vec<Term>>,
        /// Keyword arguments for method calls
        #[serde(default)]
        kwargs: Option<BTreeMap<Symbol, Term>>,
    },

    /// Is `instance` an instance of `class_tag`?
    ExternalIsa {
        /// Id to answer with
        call_id: u64,
        /// Value under test
        instance: Term,
        /// Class name
        class_tag: Symbol,
    },

    /// Is `left_class_tag` more specific than `right_class_tag` for this instance?
    ExternalIsSubSpecializer {
        /// Id to answer with
        call_id: u64,
        /// Instance whose class order decides
        instance_id: u64,
        /// Candidate more-specific class
        left_class_tag: Symbol,
        /// Candidate less-specific class
        right_class_tag: Symbol,
    },

    /// Is `left_class_tag` a subclass of `right_class_tag`?
    ExternalIsSubclass {
        /// Id to answer with
        call_id: u64,
        /// Candidate subclass
        left_class_tag: Symbol,
        /// Candidate superclass
        right_class_tag: Symbol,
    },

    /// Are two host instances equal?
    ExternalUnify {
        /// Id to answer with
        call_id: u64,
        /// Left instance id
        left_instance_id: u64,
        /// Right instance id
        right_instance_id: u64,
    },

    /// Compare host values with an operator
    ExternalOp {
        /// Id to answer with
        call_id: u64,
        /// Comparison operator
        operator: Operator,
        /// Operands
        args: Vec<Term>,
    },

    /// Advance the host iterator bound to `call_id`
    NextExternal {
        /// Id to answer with, stable across one iteration
        call_id: u64,
        /// Iterable value
        iterable: Term,
    },
}

impl QueryEvent {
    /// Event name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryEvent::Done { .. } => "Done",
            QueryEvent::Result { .. } => "Result",
            QueryEvent::MakeExternal { .. } => "MakeExternal",
            QueryEvent::ExternalCall { .. } => "ExternalCall",
            QueryEvent::ExternalIsa { .. } => "ExternalIsa",
            QueryEvent::ExternalIsSubSpecializer { .. } => "ExternalIsSubSpecializer",
            QueryEvent::ExternalIsSubclass { .. } => "ExternalIsSubclass",
            QueryEvent::ExternalUnify { .. } => "ExternalUnify",
            QueryEvent::ExternalOp { .. } => "ExternalOp",
            QueryEvent::NextExternal { .. } => "NextExternal",
        }
    }
}

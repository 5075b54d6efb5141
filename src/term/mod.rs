//! Term data structures exchanged with the engine.
//!
//! Terms are the engine's tagged value representation. They cross the ABI as
//! JSON in the shape `{"value": {"<Kind>": ...}}` and are immutable once built.

mod event;

pub use event::{Operator, QueryEvent};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A variable or field name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Create a new symbol.
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    /// Borrow the symbol name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol(name.to_string())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Variable bindings keyed by variable name.
pub type Bindings = HashMap<Symbol, Term>;

/// An engine term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    value: Arc<Value>,
}

impl Term {
    /// Wrap a value in a term.
    pub fn new(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    /// Borrow the term's value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Integer term.
    pub fn integer(i: i64) -> Self {
        Self::new(Value::Number(Numeric::Integer(i)))
    }

    /// Float term.
    pub fn float(f: f64) -> Self {
        Self::new(Value::Number(Numeric::Float(f)))
    }

    /// String term.
    pub fn string(s: impl Into<String>) -> Self {
        Self::new(Value::String(s.into()))
    }

    /// Boolean term.
    pub fn boolean(b: bool) -> Self {
        Self::new(Value::Boolean(b))
    }

    /// List term without a rest variable.
    pub fn list(elements: Vec<Term>) -> Self {
        Self::new(Value::List(List {
            elements,
            rest_var: None,
        }))
    }

    /// Dictionary term.
    pub fn dictionary(fields: BTreeMap<Symbol, Term>) -> Self {
        Self::new(Value::Dictionary(Dictionary { fields }))
    }

    /// Variable term.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(Value::Variable(Symbol::new(name)))
    }

    /// Call term with positional arguments.
    pub fn call(name: impl Into<String>, args: Vec<Term>) -> Self {
        Self::new(Value::Call(Call {
            name: Symbol::new(name),
            args,
            kwargs: None,
        }))
    }

    /// Reference to a host instance by id.
    pub fn external(instance_id: u64) -> Self {
        Self::new(Value::ExternalInstance(ExternalInstance {
            instance_id,
            constructor: None,
            repr: None,
            class_repr: None,
        }))
    }

    /// Short name of the term's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        self.value.kind()
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::new(value)
    }
}

/// The tagged value carried by a term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Integer or float
    Number(Numeric),
    /// UTF-8 string
    String(String),
    /// Boolean
    Boolean(bool),
    /// Host object referenced by id
    ExternalInstance(ExternalInstance),
    /// Class name plus field map, as written in policy source
    InstanceLiteral(InstanceLiteral),
    /// Ordered string-keyed map
    Dictionary(Dictionary),
    /// Specializer pattern
    Pattern(Pattern),
    /// Predicate or method call
    Call(Call),
    /// List of terms
    List(List),
    /// Unbound variable
    Variable(Symbol),
}

impl Value {
    /// Short name of the value's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Number(Numeric::Integer(_)) => "Integer",
            Value::Number(Numeric::Float(_)) => "Float",
            Value::String(_) => "String",
            Value::Boolean(_) => "Boolean",
            Value::ExternalInstance(_) => "ExternalInstance",
            Value::InstanceLiteral(_) => "InstanceLiteral",
            Value::Dictionary(_) => "Dictionary",
            Value::Pattern(_) => "Pattern",
            Value::Call(_) => "Call",
            Value::List(_) => "List",
            Value::Variable(_) => "Variable",
        }
    }
}

/// Numeric payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Numeric {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
}

/// Host instance reference. Only the id is meaningful to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalInstance {
    /// Registry id of the instance
    pub instance_id: u64,
    /// Constructor the engine used, if it created the instance
    #[serde(default)]
    pub constructor: Option<Term>,
    /// Human-readable representation
    #[serde(default)]
    pub repr: Option<String>,
    /// Class name
    #[serde(default)]
    pub class_repr: Option<String>,
}

/// Class name plus fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceLiteral {
    /// Class name
    pub tag: Symbol,
    /// Field map
    pub fields: Dictionary,
}

/// Ordered mapping of field names to terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Fields in key order
    pub fields: BTreeMap<Symbol, Term>,
}

/// Specializer pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// Structural dictionary pattern
    Dictionary(Dictionary),
    /// Class pattern with field constraints
    Instance(InstanceLiteral),
}

/// Predicate or method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Callee name
    pub name: Symbol,
    /// Positional arguments
    pub args: Vec<Term>,
    /// Keyword arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<BTreeMap<Symbol, Term>>,
}

/// List with an optional rest variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    /// Elements
    pub elements: Vec<Term>,
    /// Tail variable for partially-known lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_var: Option<Symbol>,
}

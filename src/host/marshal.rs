//! Conversion between host values and engine terms.
//!
//! Instances cross the boundary as ids only. Ids allocated while marshaling are
//! owned by the marshaler and released when it is dropped, so each query cleans
//! up after itself.

use super::registry::{Owner, Registry};
use super::value::HostValue;
use crate::term::{Bindings, Dictionary, ExternalInstance, List, Numeric, Symbol, Term, Value};
use crate::{Error, Result};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Query-scoped value marshaler.
pub struct Marshaler {
    registry: Arc<Registry>,
    allocated: Vec<u64>,
}

impl Marshaler {
    /// Create a marshaler over a registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            allocated: Vec::new(),
        }
    }

    /// The registry ids resolve against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Convert a host value into a term.
    ///
    /// Non-finite floats have no representation on the wire and fail rather than
    /// being silently rewritten.
    pub fn to_term(&mut self, value: &HostValue) -> Result<Term> {
        let value = match value {
            HostValue::Integer(i) => Value::Number(Numeric::Integer(*i)),
            HostValue::Float(f) => {
                if !f.is_finite() {
                    return Err(Error::marshal_kind(
                        format!("non-finite float {} cannot cross the boundary", f),
                        "Float",
                    ));
                }
                Value::Number(Numeric::Float(*f))
            }
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::Boolean(b) => Value::Boolean(*b),
            HostValue::List(items) => Value::List(List {
                elements: items
                    .iter()
                    .map(|item| self.to_term(item))
                    .collect::<Result<Vec<_>>>()?,
                rest_var: None,
            }),
            HostValue::Map(fields) => Value::Dictionary(Dictionary {
                fields: fields
                    .iter()
                    .map(|(k, v)| Ok((Symbol::new(k.clone()), self.to_term(v)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            }),
            HostValue::Variable(name) => Value::Variable(Symbol::new(name.clone())),
            HostValue::Instance(instance) => {
                let instance_id = match instance.id() {
                    Some(id) if self.registry.holds(id, instance) => id,
                    Some(id) => {
                        return Err(Error::resource(
                            format!("instance id {} was released", id),
                            id,
                        ))
                    }
                    None => {
                        let id = self.registry.register_instance(instance.clone(), Owner::Query);
                        self.allocated.push(id);
                        id
                    }
                };
                let class_repr = self
                    .registry
                    .class_for(instance)
                    .map(|class| class.name().to_string())
                    .unwrap_or_else(|| instance.type_name().to_string());
                Value::ExternalInstance(ExternalInstance {
                    instance_id,
                    constructor: None,
                    repr: None,
                    class_repr: Some(class_repr),
                })
            }
        };
        Ok(Term::new(value))
    }

    /// Convert a term into a host value.
    pub fn from_term(&self, term: &Term) -> Result<HostValue> {
        match term.value() {
            Value::Number(Numeric::Integer(i)) => Ok(HostValue::Integer(*i)),
            Value::Number(Numeric::Float(f)) => Ok(HostValue::Float(*f)),
            Value::String(s) => Ok(HostValue::String(s.clone())),
            Value::Boolean(b) => Ok(HostValue::Boolean(*b)),
            Value::List(List { elements, rest_var }) => {
                if let Some(rest) = rest_var {
                    return Err(Error::marshal_kind(
                        format!("list with unbound rest variable {} has no host value", rest),
                        "List",
                    ));
                }
                elements
                    .iter()
                    .map(|element| self.from_term(element))
                    .collect::<Result<Vec<_>>>()
                    .map(HostValue::List)
            }
            Value::Dictionary(Dictionary { fields }) => fields
                .iter()
                .map(|(k, v)| Ok((k.0.clone(), self.from_term(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(HostValue::Map),
            Value::ExternalInstance(ExternalInstance { instance_id, .. }) => self
                .registry
                .lookup(*instance_id)
                .map(HostValue::Instance),
            Value::Variable(name) => Ok(HostValue::Variable(name.0.clone())),
            other @ (Value::InstanceLiteral(_) | Value::Pattern(_) | Value::Call(_)) => {
                Err(Error::marshal_kind(
                    format!("{} terms have no host representation", other.kind()),
                    other.kind(),
                ))
            }
        }
    }

    /// Convert host bindings into engine bindings.
    pub fn to_bindings(&mut self, values: &HashMap<String, HostValue>) -> Result<Bindings> {
        values
            .iter()
            .map(|(name, value)| Ok((Symbol::new(name.clone()), self.to_term(value)?)))
            .collect()
    }

    /// Convert engine bindings into host bindings, ordered by variable name.
    pub fn from_bindings(&self, bindings: &Bindings) -> Result<BTreeMap<String, HostValue>> {
        bindings
            .iter()
            .map(|(name, term)| Ok((name.0.clone(), self.from_term(term)?)))
            .collect()
    }

    /// Take ownership of an id registered on this marshaler's behalf.
    pub fn adopt(&mut self, id: u64) {
        self.allocated.push(id);
    }

    /// Ids currently owned by this marshaler.
    pub fn allocated(&self) -> &[u64] {
        &self.allocated
    }

    /// Give up ownership of every id without releasing it. The caller becomes
    /// responsible for the returned ids.
    pub fn detach(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.allocated)
    }

    /// Release every owned id. Returns how many were still live.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for id in self.allocated.drain(..) {
            match self.registry.release(id) {
                Ok(_) => released += 1,
                Err(e) => debug!(instance_id = id, error = %e, "query-owned instance already gone"),
            }
        }
        released
    }
}

impl Drop for Marshaler {
    fn drop(&mut self) {
        self.release_all();
    }
}

//! External dispatcher.
//!
//! Answers the engine's questions about host objects: member lookups, class
//! membership, specificity, equality, comparisons, construction and iteration.
//! One dispatcher lives for the duration of one query and owns that query's
//! marshaler and open iterators.

use crate::cache::{MemberKind, Resolution, ResolutionCache, ResolutionKey};
use crate::error::ErrorContext;
use crate::host::{Args, Class, HostIter, HostValue, Instance, Marshaler, Owner, Registry};
use crate::term::{Call, Numeric, Operator, QueryEvent, Symbol, Term, Value};
use crate::{Error, Result};

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// Answer to send back for a dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Call being answered
    pub call_id: u64,
    /// Result term; `None` means "no result"
    pub result: Option<Term>,
}

impl Answer {
    fn value(call_id: u64, term: Term) -> Self {
        Self {
            call_id,
            result: Some(term),
        }
    }

    fn boolean(call_id: u64, b: bool) -> Self {
        Self::value(call_id, Term::boolean(b))
    }

    fn nothing(call_id: u64) -> Self {
        Self {
            call_id,
            result: None,
        }
    }
}

/// Resolves and invokes host members for one query.
pub struct Dispatcher {
    registry: Arc<Registry>,
    cache: Option<Arc<ResolutionCache>>,
    marshaler: Marshaler,
    iterators: HashMap<u64, HostIter>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry, with an optional resolution cache.
    pub fn new(registry: Arc<Registry>, cache: Option<Arc<ResolutionCache>>) -> Self {
        Self {
            marshaler: Marshaler::new(registry.clone()),
            registry,
            cache,
            iterators: HashMap::new(),
        }
    }

    /// The query's marshaler.
    pub fn marshaler(&self) -> &Marshaler {
        &self.marshaler
    }

    /// Mutable access to the query's marshaler.
    pub fn marshaler_mut(&mut self) -> &mut Marshaler {
        &mut self.marshaler
    }

    /// Number of iterators still open.
    pub fn open_iterators(&self) -> usize {
        self.iterators.len()
    }

    /// Drop open iterators and release every query-owned instance.
    pub fn close(&mut self) -> usize {
        self.iterators.clear();
        self.marshaler.release_all()
    }

    /// Handle one external event.
    ///
    /// Returns the answer to send, or `None` for events the engine does not wait on.
    /// `Result` and `Done` are driver events and are rejected here.
    pub fn dispatch(&mut self, event: &QueryEvent) -> Result<Option<Answer>> {
        debug!(event = event.kind(), "dispatching external event");
        match event {
            QueryEvent::MakeExternal {
                instance_id,
                constructor,
            } => {
                self.make_external(*instance_id, constructor)?;
                Ok(None)
            }
            QueryEvent::ExternalCall {
                call_id,
                instance,
                attribute,
                args,
                kwargs,
            } => {
                let result = self.call(instance, attribute, args.as_deref(), kwargs.as_ref())?;
                Ok(Some(Answer::value(*call_id, result)))
            }
            QueryEvent::ExternalIsa {
                call_id,
                instance,
                class_tag,
            } => Ok(Some(Answer::boolean(*call_id, self.isa(instance, class_tag)?))),
            QueryEvent::ExternalIsSubSpecializer {
                call_id,
                instance_id,
                left_class_tag,
                right_class_tag,
            } => {
                let answer = self.is_subspecializer(*instance_id, left_class_tag, right_class_tag)?;
                Ok(Some(Answer::boolean(*call_id, answer)))
            }
            QueryEvent::ExternalIsSubclass {
                call_id,
                left_class_tag,
                right_class_tag,
            } => {
                let answer = self.is_subclass(left_class_tag, right_class_tag);
                Ok(Some(Answer::boolean(*call_id, answer)))
            }
            QueryEvent::ExternalUnify {
                call_id,
                left_instance_id,
                right_instance_id,
            } => {
                let answer = self.unify(*left_instance_id, *right_instance_id)?;
                Ok(Some(Answer::boolean(*call_id, answer)))
            }
            QueryEvent::ExternalOp {
                call_id,
                operator,
                args,
            } => Ok(Some(Answer::boolean(*call_id, self.compare(*operator, args)?))),
            QueryEvent::NextExternal { call_id, iterable } => {
                match self.next_external(*call_id, iterable)? {
                    Some(term) => Ok(Some(Answer::value(*call_id, term))),
                    None => Ok(Some(Answer::nothing(*call_id))),
                }
            }
            QueryEvent::Result { .. } | QueryEvent::Done { .. } => Err(Error::protocol(format!(
                "{} is not an external event",
                event.kind()
            ))),
        }
    }

    fn make_external(&mut self, instance_id: u64, constructor: &Term) -> Result<()> {
        let Call { name, args, kwargs } = match constructor.value() {
            Value::Call(call) => call,
            other => {
                return Err(Error::protocol(format!(
                    "constructor must be a call, got {}",
                    other.kind()
                )))
            }
        };
        reject_kwargs(kwargs.as_ref(), name.as_str())?;

        let class = self
            .registry
            .class(name.as_str())
            .ok_or_else(|| Error::protocol(format!("unknown class {}", name)))?;
        let constructor = class.constructor.clone().ok_or_else(|| {
            Error::protocol(format!("class {} cannot be constructed from policy", name))
        })?;

        let args = self.unmarshal_args(args)?;
        let instance = guarded(class.name(), "new", || constructor(args))?;
        self.registry
            .register_instance_with_id(instance_id, instance, Owner::Query)?;
        self.marshaler.adopt(instance_id);
        debug!(class = %class.name(), instance_id, "constructed external instance");
        Ok(())
    }

    fn call(
        &mut self,
        instance: &Term,
        member: &Symbol,
        args: Option<&[Term]>,
        kwargs: Option<&BTreeMap<Symbol, Term>>,
    ) -> Result<Term> {
        reject_kwargs(kwargs, member.as_str())?;

        let receiver = match self.marshaler.from_term(instance)? {
            HostValue::Instance(instance) => instance,
            other => {
                return Err(Error::protocol(format!(
                    "cannot look up {} on a {}",
                    member,
                    other.kind()
                )))
            }
        };
        let class = self.class_of(&receiver)?;

        let value = match args {
            None => self.invoke_member(
                &class,
                &receiver,
                member.as_str(),
                MemberKind::Attribute,
                Args::default(),
            )?,
            Some(args) => {
                let args = self.unmarshal_args(args)?;
                self.invoke_member(&class, &receiver, member.as_str(), MemberKind::Method, args)?
            }
        };
        self.marshaler.to_term(&value)
    }

    fn invoke_member(
        &self,
        class: &Class,
        receiver: &Instance,
        member: &str,
        kind: MemberKind,
        args: Args,
    ) -> Result<HostValue> {
        let (owner, found) = self.resolve(class, member, kind)?;
        match found {
            MemberKind::Attribute => {
                let getter = owner.attributes.get(member).cloned().ok_or_else(|| {
                    Error::protocol(format!("{} has no attribute {}", owner.name(), member))
                })?;
                guarded(owner.name(), member, || getter(receiver))
            }
            MemberKind::Method => {
                let method = owner.methods.get(member).cloned().ok_or_else(|| {
                    Error::protocol(format!("{} has no method {}", owner.name(), member))
                })?;
                guarded(owner.name(), member, || method(receiver, args))
            }
        }
    }

    /// Find the class in `class`'s specializer order that defines `member`.
    ///
    /// Attribute lookups accept a zero-argument method when no getter exists.
    fn resolve(
        &self,
        class: &Class,
        member: &str,
        kind: MemberKind,
    ) -> Result<(Arc<Class>, MemberKind)> {
        let key = ResolutionKey::new(class.name(), member, kind);
        if let Some(cache) = &self.cache {
            if let Some(Resolution { class: owner, kind }) = cache.get(&key) {
                if let Some(owner) = self.registry.class(&owner) {
                    return Ok((owner, kind));
                }
            }
        }

        for name in class.specializer_order() {
            let Some(candidate) = self.registry.class(name) else {
                continue;
            };
            let found = match kind {
                MemberKind::Attribute if candidate.has_attribute(member) => {
                    Some(MemberKind::Attribute)
                }
                _ if candidate.has_method(member) => Some(MemberKind::Method),
                _ => None,
            };
            if let Some(found) = found {
                if let Some(cache) = &self.cache {
                    cache.put(
                        key,
                        Resolution {
                            class: candidate.name().to_string(),
                            kind: found,
                        },
                    );
                }
                return Ok((candidate, found));
            }
        }

        let what = match kind {
            MemberKind::Attribute => "attribute",
            MemberKind::Method => "method",
        };
        Err(Error::protocol(format!(
            "{} has no {} {}",
            class.name(),
            what,
            member
        )))
    }

    fn isa(&self, term: &Term, class_tag: &Symbol) -> Result<bool> {
        let tag = class_tag.as_str();
        let answer = match term.value() {
            Value::ExternalInstance(external) => {
                let instance = self.registry.lookup(external.instance_id)?;
                match self.registry.class_for(&instance) {
                    Some(class) => class.is_subclass_of(tag),
                    None => false,
                }
            }
            Value::Number(Numeric::Integer(_)) => tag == "Integer",
            Value::Number(Numeric::Float(_)) => tag == "Float",
            Value::String(_) => tag == "String",
            Value::Boolean(_) => tag == "Boolean",
            Value::List(_) => tag == "List",
            Value::Dictionary(_) => tag == "Dictionary",
            other => {
                return Err(Error::protocol(format!(
                    "cannot test a {} against class {}",
                    other.kind(),
                    tag
                )))
            }
        };
        Ok(answer)
    }

    fn is_subspecializer(&self, instance_id: u64, left: &Symbol, right: &Symbol) -> Result<bool> {
        let instance = self.registry.lookup(instance_id)?;
        let Some(class) = self.registry.class_for(&instance) else {
            return Ok(false);
        };
        let answer = match (
            class.specificity(left.as_str()),
            class.specificity(right.as_str()),
        ) {
            (Some(l), Some(r)) => l < r,
            _ => false,
        };
        Ok(answer)
    }

    fn is_subclass(&self, left: &Symbol, right: &Symbol) -> bool {
        if left == right {
            return true;
        }
        match self.registry.class(left.as_str()) {
            Some(class) => class.is_subclass_of(right.as_str()),
            None => {
                debug!(class = %left, "subclass check on unregistered class");
                false
            }
        }
    }

    fn unify(&self, left_id: u64, right_id: u64) -> Result<bool> {
        let left = self.registry.lookup(left_id)?;
        let right = self.registry.lookup(right_id)?;
        self.instances_equal(&left, &right)
    }

    fn instances_equal(&self, left: &Instance, right: &Instance) -> Result<bool> {
        if left.same_object(right) {
            return Ok(true);
        }
        match self.registry.class_for(left) {
            Some(class) => match class.equality.clone() {
                Some(eq) => guarded(class.name(), "==", || eq(left, right)),
                None => Ok(false),
            },
            None => Ok(false),
        }
    }

    fn compare(&self, operator: Operator, args: &[Term]) -> Result<bool> {
        let [left, right] = args else {
            return Err(Error::protocol(format!(
                "{:?} takes two operands, got {}",
                operator,
                args.len()
            )));
        };
        let left = self.marshaler.from_term(left)?;
        let right = self.marshaler.from_term(right)?;

        let ordering = match (&left, &right) {
            (HostValue::Integer(l), HostValue::Integer(r)) => Some(l.cmp(r)),
            (HostValue::Integer(l), HostValue::Float(r)) => (*l as f64).partial_cmp(r),
            (HostValue::Float(l), HostValue::Integer(r)) => l.partial_cmp(&(*r as f64)),
            (HostValue::Float(l), HostValue::Float(r)) => l.partial_cmp(r),
            (HostValue::String(l), HostValue::String(r)) => Some(l.cmp(r)),
            (HostValue::Boolean(l), HostValue::Boolean(r)) => Some(l.cmp(r)),
            (HostValue::Instance(l), HostValue::Instance(r)) => {
                return self.compare_instances(operator, l, r)
            }
            _ => {
                return match operator {
                    Operator::Eq => Ok(left == right),
                    Operator::Neq => Ok(left != right),
                    _ => Err(Error::protocol(format!(
                        "cannot compare {} with {} using {:?}",
                        left.kind(),
                        right.kind(),
                        operator
                    ))),
                }
            }
        };
        Ok(apply(operator, ordering))
    }

    fn compare_instances(
        &self,
        operator: Operator,
        left: &Instance,
        right: &Instance,
    ) -> Result<bool> {
        match operator {
            Operator::Eq => self.instances_equal(left, right),
            Operator::Neq => self.instances_equal(left, right).map(|eq| !eq),
            _ => {
                let class = self.class_of(left)?;
                let ordering = class.ordering.clone().ok_or_else(|| {
                    Error::protocol(format!("instances of {} are not ordered", class.name()))
                })?;
                let result = guarded(class.name(), "<", || ordering(left, right))?;
                Ok(apply(operator, result))
            }
        }
    }

    fn next_external(&mut self, call_id: u64, iterable: &Term) -> Result<Option<Term>> {
        if !self.iterators.contains_key(&call_id) {
            let iter = self.open_iterator(iterable)?;
            self.iterators.insert(call_id, iter);
        }

        let next = match self.iterators.get_mut(&call_id) {
            Some(iter) => guarded("iterator", "next", || iter.next().transpose())?,
            None => None,
        };
        match next {
            Some(value) => self.marshaler.to_term(&value).map(Some),
            None => {
                self.iterators.remove(&call_id);
                debug!(call_id, "iterator exhausted");
                Ok(None)
            }
        }
    }

    fn open_iterator(&self, iterable: &Term) -> Result<HostIter> {
        match self.marshaler.from_term(iterable)? {
            HostValue::List(items) => Ok(Box::new(items.into_iter().map(Ok))),
            HostValue::Instance(instance) => {
                let class = self.class_of(&instance)?;
                let hook = class.iterator.clone().ok_or_else(|| {
                    Error::protocol(format!("instances of {} are not iterable", class.name()))
                })?;
                guarded(class.name(), "__iter__", || hook(&instance))
            }
            other => Err(Error::protocol(format!("a {} is not iterable", other.kind()))),
        }
    }

    fn class_of(&self, instance: &Instance) -> Result<Arc<Class>> {
        self.registry.class_for(instance).ok_or_else(|| {
            Error::protocol(format!(
                "no class registered for instances of {}",
                instance.type_name()
            ))
        })
    }

    fn unmarshal_args(&self, args: &[Term]) -> Result<Args> {
        args.iter()
            .map(|arg| self.marshaler.from_term(arg))
            .collect::<Result<Vec<_>>>()
            .map(Args::new)
    }
}

fn reject_kwargs(kwargs: Option<&BTreeMap<Symbol, Term>>, member: &str) -> Result<()> {
    match kwargs {
        Some(kwargs) if !kwargs.is_empty() => Err(Error::protocol(format!(
            "keyword arguments are not supported (calling {})",
            member
        ))),
        _ => Ok(()),
    }
}

fn apply(operator: Operator, ordering: Option<Ordering>) -> bool {
    match (operator, ordering) {
        (Operator::Eq, o) => o == Some(Ordering::Equal),
        (Operator::Neq, o) => o != Some(Ordering::Equal),
        (_, None) => false,
        (Operator::Lt, Some(o)) => o == Ordering::Less,
        (Operator::Leq, Some(o)) => o != Ordering::Greater,
        (Operator::Gt, Some(o)) => o == Ordering::Greater,
        (Operator::Geq, Some(o)) => o != Ordering::Less,
    }
}

/// Run host code, turning a panic into an application error.
fn guarded<R>(class: &str, member: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.with_member(class, member),
        Err(payload) => {
            Err(Error::application(panic_message(payload.as_ref()))).with_member(class, member)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "host code panicked".to_string()
    }
}

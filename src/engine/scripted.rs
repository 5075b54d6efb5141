//! Scripted engine for tests.
//!
//! Rules are Rust closures that emit protocol events. Each query runs a fresh
//! program built from the query's arguments; the program sees the host's reply to
//! its previous event.

use super::{Engine, NativeError, NativeErrorKind, NativeQuery, Source};
use crate::term::{Bindings, QueryEvent, Term, Value};

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// What the host sent back after the last event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Call(u64, Option<Term>),
    ApplicationError(String),
}

pub(crate) type Program =
    Box<dyn FnMut(Option<Reply>) -> Result<QueryEvent, NativeError> + Send>;

type Rule = Arc<dyn Fn(&[Term], &Bindings) -> Program + Send + Sync>;

/// Emit `events` in order, then `Done`.
pub(crate) fn script(events: Vec<QueryEvent>) -> Program {
    let mut events = events.into_iter();
    Box::new(move |_| {
        Ok(events
            .next()
            .unwrap_or(QueryEvent::Done { result: false }))
    })
}

/// An empty solution.
pub(crate) fn solution() -> QueryEvent {
    QueryEvent::Result {
        bindings: Bindings::new(),
        trace: None,
    }
}

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    rules: Mutex<HashMap<String, Rule>>,
    sources: Mutex<Vec<Source>>,
    constants: Mutex<BTreeMap<String, Term>>,
    frees: Arc<AtomicUsize>,
    queries: AtomicUsize,
    replies: Arc<Mutex<Vec<Reply>>>,
    next_id: AtomicU64,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Define a rule by name.
    pub(crate) fn rule<F>(self, name: &str, rule: F) -> Self
    where
        F: Fn(&[Term], &Bindings) -> Program + Send + Sync + 'static,
    {
        self.rules.lock().insert(name.to_string(), Arc::new(rule));
        self
    }

    /// Total `free` calls across all queries.
    pub(crate) fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub(crate) fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub(crate) fn replies(&self) -> Vec<Reply> {
        self.replies.lock().clone()
    }

    pub(crate) fn sources(&self) -> Vec<Source> {
        self.sources.lock().clone()
    }

    pub(crate) fn constant(&self, name: &str) -> Option<Term> {
        self.constants.lock().get(name).cloned()
    }

    fn start(&self, name: &str, args: &[Term], bindings: &Bindings) -> Box<dyn NativeQuery> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let program = match self.rules.lock().get(name).cloned() {
            Some(rule) => rule(args, bindings),
            None => script(vec![]),
        };
        Box::new(ScriptedQuery {
            program,
            pending: None,
            frees: self.frees.clone(),
            replies: self.replies.clone(),
            freed: false,
        })
    }
}

impl Engine for ScriptedEngine {
    fn load(&self, sources: &[Source]) -> Result<(), NativeError> {
        if let Some(bad) = sources.iter().find(|s| s.src.contains("syntax error")) {
            return Err(NativeError::new(
                NativeErrorKind::Parse,
                format!("did not expect to find the token 'error' in {:?}", bad.filename),
            ));
        }
        self.sources.lock().extend(sources.iter().cloned());
        Ok(())
    }

    fn clear_rules(&self) -> Result<(), NativeError> {
        self.sources.lock().clear();
        Ok(())
    }

    fn register_constant(&self, name: &str, value: &Term) -> Result<(), NativeError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(NativeError::new(
                NativeErrorKind::Validation,
                format!("{:?} is not a valid constant name", name),
            ));
        }
        self.constants.lock().insert(name.to_string(), value.clone());
        Ok(())
    }

    fn new_instance_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn new_query(
        &self,
        query: &Term,
        bindings: &Bindings,
    ) -> Result<Box<dyn NativeQuery>, NativeError> {
        match query.value() {
            Value::Call(call) => Ok(self.start(call.name.as_str(), &call.args, bindings)),
            other => Err(NativeError::new(
                NativeErrorKind::Runtime,
                format!("cannot query a {}", other.kind()),
            )),
        }
    }

    fn new_query_from_str(
        &self,
        query: &str,
        bindings: &Bindings,
    ) -> Result<Box<dyn NativeQuery>, NativeError> {
        if query.contains("syntax error") {
            return Err(NativeError::new(NativeErrorKind::Parse, "unexpected token"));
        }
        Ok(self.start(query.trim(), &[], bindings))
    }
}

struct ScriptedQuery {
    program: Program,
    pending: Option<Reply>,
    frees: Arc<AtomicUsize>,
    replies: Arc<Mutex<Vec<Reply>>>,
    freed: bool,
}

impl NativeQuery for ScriptedQuery {
    fn next_event(&mut self) -> Result<QueryEvent, NativeError> {
        if self.freed {
            return Err(NativeError::new(
                NativeErrorKind::Unknown("Freed".into()),
                "query used after it was freed",
            ));
        }
        (self.program)(self.pending.take())
    }

    fn answer_call(&mut self, call_id: u64, result: Option<&Term>) -> Result<(), NativeError> {
        let reply = Reply::Call(call_id, result.cloned());
        self.replies.lock().push(reply.clone());
        self.pending = Some(reply);
        Ok(())
    }

    fn answer_application_error(&mut self, message: &str) -> Result<(), NativeError> {
        let reply = Reply::ApplicationError(message.to_string());
        self.replies.lock().push(reply.clone());
        self.pending = Some(reply);
        Ok(())
    }

    fn free(&mut self) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        self.freed = true;
    }
}

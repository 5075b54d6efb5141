//! Query driver.
//!
//! A [`Query`] pulls events from the native query, answers external events through
//! its [`Dispatcher`], and yields each solution as a [`ResultSet`]. The sequence is
//! lazy, finite and cannot be restarted.

use super::ResultSet;
use crate::core::Dispatcher;
use crate::engine::NativeQuery;
use crate::telemetry::{span, QueryOutcome, Span as Timer, Telemetry};
use crate::term::QueryEvent;
use crate::{Error, Result};

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Lifecycle of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Created, not yet polled
    Idle,
    /// Waiting for the engine's next event
    WaitingEvent,
    /// Running host code for an external event
    AwaitingHostResponse,
    /// No further solutions
    Done,
    /// Failed; no further solutions
    Errored,
}

impl QueryState {
    /// Whether the query can produce no more solutions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Done | QueryState::Errored)
    }
}

/// A running query.
///
/// Dropping a query before it finishes releases its native handle and every
/// instance registered on its behalf.
pub struct Query {
    id: Uuid,
    native: Box<dyn NativeQuery>,
    dispatcher: Dispatcher,
    state: QueryState,
    released: bool,
    telemetry: Option<Arc<Telemetry>>,
    timer: Timer,
    span: tracing::Span,
}

impl Query {
    pub(crate) fn new(
        native: Box<dyn NativeQuery>,
        dispatcher: Dispatcher,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        let id = Uuid::new_v4();
        let service = telemetry.as_ref().map(|t| t.service_name().to_string());
        if let Some(telemetry) = &telemetry {
            telemetry.record_query_started();
        }
        Self {
            id,
            native,
            dispatcher,
            state: QueryState::Idle,
            released: false,
            telemetry,
            timer: span(),
            span: tracing::debug_span!("query", query_id = %id, service = service.as_deref()),
        }
    }

    /// Query id, as logged.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Stop the query early and release its resources.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.state = QueryState::Done;
        }
        self.release(QueryOutcome::Abandoned);
    }

    fn next_result(&mut self) -> Option<Result<ResultSet>> {
        if self.state.is_terminal() {
            return None;
        }
        let query_span = self.span.clone();
        let _entered = query_span.enter();

        loop {
            self.state = QueryState::WaitingEvent;
            let event = match self.native.next_event() {
                Ok(event) => event,
                Err(e) => {
                    let err = Error::from_native_query(e);
                    error!(error = %err, "engine failed while producing an event");
                    return Some(Err(self.fail(err)));
                }
            };
            debug!(event = event.kind(), "query event");

            match event {
                QueryEvent::Done { .. } => {
                    self.state = QueryState::Done;
                    self.release(QueryOutcome::Completed);
                    return None;
                }
                QueryEvent::Result { bindings, .. } => {
                    return match self.dispatcher.marshaler().from_bindings(&bindings) {
                        Ok(bindings) => {
                            if let Some(telemetry) = &self.telemetry {
                                telemetry.record_result();
                            }
                            Some(Ok(ResultSet::new(bindings)))
                        }
                        Err(e) => Some(Err(self.recover_or_fail(e))),
                    };
                }
                external => {
                    self.state = QueryState::AwaitingHostResponse;
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_external_call();
                    }
                    if let Err(e) = self.answer(&external) {
                        return Some(Err(self.recover_or_fail(e)));
                    }
                }
            }
        }
    }

    /// Dispatch one external event and send the answer. On failure the error is
    /// reported into the engine before it is returned.
    fn answer(&mut self, event: &QueryEvent) -> Result<()> {
        match self.dispatcher.dispatch(event) {
            Ok(Some(answer)) => self
                .native
                .answer_call(answer.call_id, answer.result.as_ref())
                .map_err(Error::from_native_query),
            Ok(None) => Ok(()),
            Err(e) => {
                if let (Error::Application { .. }, Some(telemetry)) = (&e, &self.telemetry) {
                    telemetry.record_application_error();
                }
                warn!(event = event.kind(), error = %e, "external event failed");
                if let Err(native) = self.native.answer_application_error(&e.to_string()) {
                    debug!(error = %native, "engine did not accept the application error");
                }
                Err(e)
            }
        }
    }

    /// Marshal failures are yielded and the query stays live; anything else
    /// ends it.
    fn recover_or_fail(&mut self, err: Error) -> Error {
        if err.is_query_fatal() {
            return self.fail(err);
        }
        debug!(error = %err, "recoverable error; query continues");
        self.state = QueryState::WaitingEvent;
        err
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = QueryState::Errored;
        self.release(QueryOutcome::Errored);
        err
    }

    /// Free the native handle and the query's instances, once.
    fn release(&mut self, outcome: QueryOutcome) {
        if self.released {
            return;
        }
        self.released = true;
        self.native.free();
        let released = self.dispatcher.close();
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_query_finished(outcome, self.timer.elapsed_ms());
        }
        debug!(query_id = %self.id, ?outcome, instances = released, "query released");
    }
}

impl Iterator for Query {
    type Item = Result<ResultSet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_result()
    }
}

impl FusedIterator for Query {}

impl Drop for Query {
    fn drop(&mut self) {
        if !self.released {
            warn!(query_id = %self.id, state = ?self.state, "query dropped before completion");
            self.release(QueryOutcome::Abandoned);
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::engine::scripted::{script, solution, Program, Reply, ScriptedEngine};
    use crate::engine::{Engine, NativeError, NativeErrorKind};
    use crate::host::{Class, Instance, Owner, Registry};
    use crate::term::{Bindings, Symbol, Term};

    fn start(
        engine: &ScriptedEngine,
        registry: Arc<Registry>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Query {
        let native = engine
            .new_query(&Term::call("q", vec![]), &Bindings::new())
            .unwrap();
        Query::new(native, Dispatcher::new(registry, None), telemetry)
    }

    #[test]
    fn test_yields_solutions_then_done() {
        let engine = ScriptedEngine::new().rule("q", |_, _| {
            let mut bindings = Bindings::new();
            bindings.insert(Symbol::new("x"), Term::integer(1));
            script(vec![
                QueryEvent::Result {
                    bindings,
                    trace: None,
                },
                solution(),
            ])
        });
        let mut query = start(&engine, Arc::new(Registry::new()), None);
        assert_eq!(query.state(), QueryState::Idle);

        let first = query.next().unwrap().unwrap();
        assert_eq!(first.get_typed::<i64>("x").unwrap(), 1);
        assert!(query.next().unwrap().unwrap().is_empty());
        assert!(query.next().is_none());
        assert_eq!(query.state(), QueryState::Done);
        assert!(query.next().is_none());
        assert_eq!(engine.frees(), 1);

        drop(query);
        assert_eq!(engine.frees(), 1);
    }

    #[test]
    fn test_abandoned_query_frees_once() {
        let engine = ScriptedEngine::new().rule("q", |_, _| script(vec![solution(), solution()]));
        let telemetry = Arc::new(Telemetry::new(&TelemetryConfig::default()));
        let mut query = start(&engine, Arc::new(Registry::new()), Some(telemetry.clone()));

        assert!(query.next().unwrap().is_ok());
        drop(query);

        assert_eq!(engine.frees(), 1);
        assert_eq!(telemetry.metrics().queries_abandoned, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let engine = ScriptedEngine::new().rule("q", |_, _| script(vec![solution()]));
        let mut query = start(&engine, Arc::new(Registry::new()), None);
        query.close();
        query.close();
        assert!(query.next().is_none());
        drop(query);
        assert_eq!(engine.frees(), 1);
    }

    #[test]
    fn test_native_error_ends_query() {
        let engine = ScriptedEngine::new().rule("q", |_, _| {
            Box::new(|_: Option<Reply>| {
                Err(NativeError::new(NativeErrorKind::Runtime, "stack overflow"))
            }) as Program
        });
        let mut query = start(&engine, Arc::new(Registry::new()), None);
        let err = query.next().unwrap().unwrap_err();
        assert_eq!(err, Error::protocol("stack overflow"));
        assert_eq!(query.state(), QueryState::Errored);
        assert!(query.next().is_none());
        assert_eq!(engine.frees(), 1);
    }

    #[test]
    fn test_failed_dispatch_reports_into_engine() {
        struct Doc;
        let registry = Arc::new(Registry::new());
        registry.register_class(
            Class::builder::<Doc>("Doc")
                .add_method("owner", |_: &Doc, _| -> std::result::Result<String, String> {
                    Err("owner lookup failed".to_string())
                })
                .build(),
        );
        let id = registry.register_instance(Instance::new(Doc), Owner::Host);

        let engine = ScriptedEngine::new().rule("q", move |_, _| {
            script(vec![QueryEvent::ExternalCall {
                call_id: 3,
                instance: Term::external(id),
                attribute: Symbol::new("owner"),
                args: Some(vec![]),
                kwargs: None,
            }])
        });
        let telemetry = Arc::new(Telemetry::new(&TelemetryConfig::default()));
        let mut query = start(&engine, registry.clone(), Some(telemetry.clone()));

        let err = query.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Application { ref message, .. } if message == "owner lookup failed"
        ));
        assert_eq!(
            engine.replies(),
            vec![Reply::ApplicationError(err.to_string())]
        );
        assert_eq!(engine.frees(), 1);
        assert_eq!(registry.instance_count(), 1);

        let metrics = telemetry.metrics();
        assert_eq!(metrics.application_errors, 1);
        assert_eq!(metrics.queries_errored, 1);
    }

    #[test]
    fn test_marshal_error_does_not_end_query() {
        struct Reading;
        let registry = Arc::new(Registry::new());
        registry.register_class(
            Class::builder::<Reading>("Reading")
                .add_attribute_getter("value", |_: &Reading| f64::NAN)
                .build(),
        );
        let id = registry.register_instance(Instance::new(Reading), Owner::Host);

        let engine = ScriptedEngine::new().rule("q", move |_, _| {
            script(vec![
                QueryEvent::ExternalCall {
                    call_id: 5,
                    instance: Term::external(id),
                    attribute: Symbol::new("value"),
                    args: None,
                    kwargs: None,
                },
                solution(),
            ])
        });
        let telemetry = Arc::new(Telemetry::new(&TelemetryConfig::default()));
        let mut query = start(&engine, registry, Some(telemetry.clone()));

        let err = query.next().unwrap().unwrap_err();
        assert_eq!(err.category(), "marshal");
        assert!(!query.state().is_terminal());
        assert_eq!(engine.frees(), 0);
        assert_eq!(engine.replies(), vec![Reply::ApplicationError(err.to_string())]);

        assert!(query.next().unwrap().unwrap().is_empty());
        assert!(query.next().is_none());
        assert_eq!(query.state(), QueryState::Done);
        assert_eq!(engine.frees(), 1);
        assert_eq!(telemetry.metrics().queries_completed, 1);
    }
}

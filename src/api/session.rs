//! Policy session: the host-facing entry point.

use super::Query;
use crate::cache::{CacheStats, ResolutionCache};
use crate::config::SessionConfig;
use crate::core::Dispatcher;
use crate::engine::{Engine, Source};
use crate::error::ErrorContext;
use crate::host::{Class, HostValue, Instance, Marshaler, Owner, Registry};
use crate::telemetry::{Telemetry, TelemetryMetrics};
use crate::term::{ExternalInstance, Term, Value};
use crate::{Error, Result};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Host-side stand-in for a class, bound as a policy constant under the class name.
#[derive(Debug)]
struct ClassObject;

/// A loaded policy engine plus the host classes and instances it can see.
///
/// Sessions are `Send + Sync`; queries may run concurrently on separate threads.
pub struct PolicySession {
    engine: Arc<dyn Engine>,
    registry: Arc<Registry>,
    cache: Option<Arc<ResolutionCache>>,
    telemetry: Option<Arc<Telemetry>>,
    /// Registry ids of constants bound by this session, by name
    constants: Mutex<HashMap<String, Vec<u64>>>,
    config: SessionConfig,
}

impl PolicySession {
    /// Create a session builder.
    pub fn builder() -> PolicySessionBuilder {
        PolicySessionBuilder::new()
    }

    /// Create a session over an engine.
    ///
    /// Instance ids are drawn from the engine so they never collide with ids the
    /// engine assigns to instances it constructs.
    pub fn new(engine: Arc<dyn Engine>, config: SessionConfig) -> Self {
        let ids = engine.clone();
        let registry = Arc::new(Registry::with_id_source(Arc::new(move || {
            ids.new_instance_id()
        })));

        let cache = if config.cache.enabled {
            Some(Arc::new(ResolutionCache::new(config.cache.max_entries)))
        } else {
            None
        };
        let telemetry = if config.telemetry.enabled {
            Some(Arc::new(Telemetry::new(&config.telemetry)))
        } else {
            None
        };

        info!(
            service = %config.telemetry.service_name,
            cache = config.cache.enabled,
            telemetry = config.telemetry.enabled,
            "policy session created"
        );
        Self {
            engine,
            registry,
            cache,
            telemetry,
            constants: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// The session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session's class and instance registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Load policy source text.
    pub fn load_str(&self, src: &str) -> Result<()> {
        self.engine
            .load(&[Source::new(src)])
            .map_err(Error::from_native_load)?;
        info!(bytes = src.len(), "policy loaded");
        Ok(())
    }

    /// Load policy files. All files are handed to the engine in one call.
    pub fn load_files<P: AsRef<Path>>(&self, paths: &[P]) -> Result<()> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let filename = path.display().to_string();
            if self.config.policy.require_polar_extension
                && path.extension().and_then(|e| e.to_str()) != Some("polar")
            {
                return Err(Error::load_file(
                    "policy files must have the .polar extension",
                    filename,
                ));
            }
            let src = std::fs::read_to_string(path).map_err(|e| {
                Error::load_file(format!("cannot read policy file: {}", e), &filename)
            })?;
            sources.push(Source::from_file(src, filename));
        }

        let loaded = self
            .engine
            .load(&sources)
            .map_err(Error::from_native_load);
        match sources.as_slice() {
            [single] => loaded.with_filename(single.filename.as_deref().unwrap_or_default())?,
            _ => loaded?,
        }
        info!(files = sources.len(), "policy files loaded");
        Ok(())
    }

    /// Drop every loaded rule. Registered classes and constants stay.
    pub fn clear_rules(&self) -> Result<()> {
        self.engine.clear_rules().map_err(Error::from_native_load)?;
        info!("rules cleared");
        Ok(())
    }

    /// Register a host class and bind its name as a policy constant.
    ///
    /// Registering a second class under the same name replaces the first.
    pub fn register_class(&self, class: Class) -> Result<()> {
        let name = class.name().to_string();
        self.registry.register_class(class);
        if let Some(cache) = &self.cache {
            cache.clear();
        }

        let id = self.registry.register_instance(
            Instance::new(ClassObject),
            Owner::Host,
        );
        let term = Term::new(Value::ExternalInstance(ExternalInstance {
            instance_id: id,
            constructor: None,
            repr: Some(name.clone()),
            class_repr: Some("Class".to_string()),
        }));
        self.bind_constant(&name, &term, vec![id])?;
        info!(class = %name, "class registered");
        Ok(())
    }

    /// Bind a host value as a policy constant.
    ///
    /// Instances inside `value` stay registered for the life of the session, or
    /// until the constant is rebound.
    pub fn register_constant(&self, name: &str, value: &HostValue) -> Result<()> {
        let mut marshaler = Marshaler::new(self.registry.clone());
        let term = marshaler.to_term(value)?;
        let ids = marshaler.detach();
        if let Err(e) = self.bind_constant(name, &term, ids.clone()) {
            for id in ids {
                if let Err(release) = self.registry.release(id) {
                    debug!(
                        constant = %name,
                        error = %release,
                        "rollback found instance already released"
                    );
                }
            }
            return Err(e);
        }
        debug!(constant = %name, kind = value.kind(), "constant registered");
        Ok(())
    }

    fn bind_constant(&self, name: &str, term: &Term, ids: Vec<u64>) -> Result<()> {
        self.engine
            .register_constant(name, term)
            .map_err(Error::from_native_load)?;
        let previous = self.constants.lock().insert(name.to_string(), ids);
        for id in previous.into_iter().flatten() {
            if let Err(e) = self.registry.release(id) {
                debug!(constant = %name, error = %e, "previous constant already released");
            }
        }
        Ok(())
    }

    /// Register a host object so it can be passed to several queries. Returns its id.
    pub fn register_instance(&self, instance: Instance) -> u64 {
        let id = self.registry.register_instance(instance, Owner::Host);
        debug!(instance_id = id, "instance registered");
        id
    }

    /// Release a host-registered object. Releasing twice is a resource error.
    pub fn release_instance(&self, id: u64) -> Result<()> {
        self.registry.release(id)?;
        debug!(instance_id = id, "instance released");
        Ok(())
    }

    /// Look up a registered object; the result carries its id.
    pub fn instance(&self, id: u64) -> Result<Instance> {
        self.registry.lookup(id)
    }

    /// Query rule `rule` with positional arguments and initial variable bindings.
    pub fn evaluate(
        &self,
        rule: &str,
        args: Vec<HostValue>,
        bindings: HashMap<String, HostValue>,
    ) -> Result<Query> {
        let mut dispatcher = self.dispatcher();
        let marshaler = dispatcher.marshaler_mut();
        let args = args
            .iter()
            .map(|arg| marshaler.to_term(arg))
            .collect::<Result<Vec<_>>>()?;
        let bindings = marshaler.to_bindings(&bindings)?;

        let native = self
            .engine
            .new_query(&Term::call(rule, args), &bindings)
            .map_err(Error::from_native_query)?;
        debug!(rule, "query started");
        Ok(Query::new(native, dispatcher, self.telemetry.clone()))
    }

    /// Query with policy-language text, e.g. `allow(x, "read", y)`.
    ///
    /// Text the engine cannot parse is a load error.
    pub fn evaluate_str(
        &self,
        query: &str,
        bindings: HashMap<String, HostValue>,
    ) -> Result<Query> {
        let mut dispatcher = self.dispatcher();
        let bindings = dispatcher.marshaler_mut().to_bindings(&bindings)?;

        let native = self
            .engine
            .new_query_from_str(query, &bindings)
            .map_err(Error::from_native_load)?;
        debug!(query, "query started");
        Ok(Query::new(native, dispatcher, self.telemetry.clone()))
    }

    /// Whether `allow(actor, action, resource)` has at least one solution.
    pub fn is_allowed(
        &self,
        actor: HostValue,
        action: HostValue,
        resource: HostValue,
    ) -> Result<bool> {
        let mut query = self.evaluate("allow", vec![actor, action, resource], HashMap::new())?;
        let allowed = match query.next() {
            Some(Ok(_)) => true,
            Some(Err(e)) => return Err(e),
            None => false,
        };
        query.close();
        Ok(allowed)
    }

    /// Current session metrics.
    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            classes: self.registry.class_names().len(),
            live_instances: self.registry.instance_count(),
            cache_enabled: self.cache.is_some(),
            cache_stats: self.cache.as_ref().map(|c| c.stats()),
            telemetry: self.telemetry.as_ref().map(|t| t.metrics()),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone(), self.cache.clone())
    }
}

impl fmt::Debug for PolicySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySession")
            .field("registry", &self.registry)
            .field("cache_enabled", &self.cache.is_some())
            .field("telemetry_enabled", &self.telemetry.is_some())
            .finish()
    }
}

/// Builder for creating a PolicySession.
#[derive(Default)]
pub struct PolicySessionBuilder {
    config: Option<SessionConfig>,
    engine: Option<Arc<dyn Engine>>,
    classes: Vec<Class>,
    sources: Vec<String>,
    policy_files: Vec<PathBuf>,
    telemetry_enabled: Option<bool>,
    cache_enabled: Option<bool>,
    cache_size: Option<usize>,
}

impl PolicySessionBuilder {
    /// Create a new session builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this engine instead of the native library.
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Register a class when the session is built.
    pub fn with_class(mut self, class: Class) -> Self {
        self.classes.push(class);
        self
    }

    /// Load policy text when the session is built.
    pub fn with_policy(mut self, src: impl Into<String>) -> Self {
        self.sources.push(src.into());
        self
    }

    /// Load a policy file when the session is built.
    pub fn with_policy_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_files.push(path.into());
        self
    }

    /// Enable or disable telemetry.
    pub fn with_telemetry_enabled(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = Some(enabled);
        self
    }

    /// Enable or disable caching.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Set the cache size.
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = Some(size);
        self
    }

    /// Build the session. Classes are registered before any policy is loaded.
    pub fn build(self) -> Result<PolicySession> {
        let mut config = self.config.unwrap_or_default();

        // Apply builder overrides
        if let Some(enabled) = self.cache_enabled {
            config.cache.enabled = enabled;
        }
        if let Some(size) = self.cache_size {
            config.cache.max_entries = size;
        }
        if let Some(enabled) = self.telemetry_enabled {
            config.telemetry.enabled = enabled;
        }
        config.validate()?;

        let engine = match self.engine {
            Some(engine) => engine,
            None => default_engine()?,
        };

        let mut files = config.policy.files.clone();
        files.extend(self.policy_files);

        let session = PolicySession::new(engine, config);
        for class in self.classes {
            session.register_class(class)?;
        }
        if !files.is_empty() {
            session.load_files(&files)?;
        }
        for src in &self.sources {
            session.load_str(src)?;
        }
        Ok(session)
    }
}

#[cfg(feature = "native")]
fn default_engine() -> Result<Arc<dyn Engine>> {
    let engine = crate::engine::NativeEngine::new().map_err(Error::from_native_load)?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "native"))]
fn default_engine() -> Result<Arc<dyn Engine>> {
    Err(Error::config_key(
        "no engine configured; enable the `native` feature or pass one with `with_engine`",
        "engine",
    ))
}

/// Session metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Registered classes
    pub classes: usize,
    /// Instances currently registered
    pub live_instances: usize,
    /// Whether the resolution cache is enabled
    pub cache_enabled: bool,
    /// Cache statistics (if caching is enabled)
    pub cache_stats: Option<CacheStats>,
    /// Query counters (if telemetry is enabled)
    pub telemetry: Option<TelemetryMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::{script, solution, Program, Reply, ScriptedEngine};
    use crate::engine::{NativeError, NativeErrorKind};
    use crate::host::{Args, IntoHostValue};
    use crate::term::{Bindings, QueryEvent, Symbol};
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        name: String,
        role: String,
    }

    #[derive(Debug)]
    struct Document;

    fn user(name: &str, role: &str) -> HostValue {
        HostValue::instance(User {
            name: name.to_string(),
            role: role.to_string(),
        })
    }

    fn user_class() -> Class {
        Class::builder::<User>("User")
            .with_constructor(|args: Args| {
                Ok(User {
                    name: args.get(0)?,
                    role: args.get(1)?,
                })
            })
            .add_attribute_getter("name", |u: &User| u.name.clone())
            .add_attribute_getter("role", |u: &User| u.role.clone())
            .add_method("audit", |_: &User, _: Args| -> std::result::Result<bool, String> {
                Err("audit log unavailable".to_string())
            })
            .add_method("explode", |_: &User, _: Args| -> bool { panic!("role table corrupted") })
            .build()
    }

    /// `allow(actor, "read", resource) if actor.role = "admin";`
    fn allow_rule(args: &[Term], _: &Bindings) -> Program {
        let actor = args[0].clone();
        let is_read = args.get(1) == Some(&Term::string("read"));
        let mut step = 0;
        Box::new(move |reply: Option<Reply>| {
            step += 1;
            match (step, reply) {
                (_, Some(Reply::ApplicationError(message))) => {
                    Err(NativeError::new(NativeErrorKind::Application, message))
                }
                (1, _) if is_read => Ok(QueryEvent::ExternalCall {
                    call_id: 1,
                    instance: actor.clone(),
                    attribute: Symbol::new("role"),
                    args: None,
                    kwargs: None,
                }),
                (2, Some(Reply::Call(1, Some(role)))) if role == Term::string("admin") => {
                    Ok(solution())
                }
                _ => Ok(QueryEvent::Done { result: step > 2 }),
            }
        })
    }

    /// Calls `method` on the first argument with no arguments.
    fn call_rule(method: &'static str) -> impl Fn(&[Term], &Bindings) -> Program {
        move |args: &[Term], _: &Bindings| {
            script(vec![
                QueryEvent::ExternalCall {
                    call_id: 7,
                    instance: args[0].clone(),
                    attribute: Symbol::new(method),
                    args: Some(vec![]),
                    kwargs: None,
                },
                solution(),
            ])
        }
    }

    fn session(engine: &Arc<ScriptedEngine>) -> PolicySession {
        PolicySession::builder()
            .with_engine(engine.clone())
            .with_class(user_class())
            .with_policy(r#"allow(actor, "read", _resource) if actor.role = "admin";"#)
            .build()
            .unwrap()
    }

    fn read(session: &PolicySession, actor: HostValue) -> Result<bool> {
        session.is_allowed(
            actor,
            "read".into_host_value()?,
            HostValue::instance(Document),
        )
    }

    #[test]
    fn test_admin_allowed_guest_denied() {
        let engine = Arc::new(ScriptedEngine::new().rule("allow", allow_rule));
        let session = session(&engine);
        let baseline = session.registry().instance_count();

        assert!(read(&session, user("ada", "admin")).unwrap());
        assert!(!read(&session, user("gus", "guest")).unwrap());

        let mut query = session
            .evaluate(
                "allow",
                vec![
                    user("ada", "admin"),
                    HostValue::String("read".into()),
                    HostValue::Integer(1),
                ],
                HashMap::new(),
            )
            .unwrap();
        assert!(query.next().unwrap().unwrap().is_empty());
        assert!(query.next().is_none());
        drop(query);

        assert_eq!(engine.queries(), 3);
        assert_eq!(engine.frees(), 3);
        assert_eq!(session.registry().instance_count(), baseline);
    }

    #[test]
    fn test_no_matching_rules_yields_nothing() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = session(&engine);

        let mut query = session.evaluate("deny", vec![], HashMap::new()).unwrap();
        assert!(query.next().is_none());
        assert!(!read(&session, user("ada", "admin")).unwrap());
    }

    #[test]
    fn test_register_use_release_instance() {
        let engine = Arc::new(ScriptedEngine::new().rule("allow", allow_rule));
        let session = session(&engine);

        let id = session.register_instance(Instance::new(User {
            name: "ada".into(),
            role: "admin".into(),
        }));
        let ada = session.instance(id).unwrap();
        assert_eq!(ada.id(), Some(id));
        assert_eq!(ada.downcast_ref::<User>().unwrap().name, "ada");

        // Reused across queries under the same id.
        assert!(read(&session, HostValue::Instance(ada.clone())).unwrap());
        assert!(read(&session, HostValue::Instance(ada)).unwrap());
        assert!(session.instance(id).is_ok());

        session.release_instance(id).unwrap();
        let err = session.release_instance(id).unwrap_err();
        assert!(matches!(err, Error::Resource { instance_id: Some(i), .. } if i == id));
        assert_eq!(session.instance(id).unwrap_err().category(), "resource");
    }

    #[test]
    fn test_abandoned_query_frees_native_handle_once() {
        let engine = Arc::new(
            ScriptedEngine::new().rule("many", |_: &[Term], _: &Bindings| {
                script(vec![solution(), solution(), solution()])
            }),
        );
        let session = session(&engine);

        let mut query = session.evaluate("many", vec![], HashMap::new()).unwrap();
        assert!(query.next().unwrap().is_ok());
        drop(query);
        assert_eq!(engine.frees(), 1);

        let metrics = session.metrics().telemetry.unwrap();
        assert_eq!(metrics.queries_abandoned, 1);
        assert_eq!(metrics.results, 1);
    }

    #[test]
    fn test_concurrent_queries_are_independent() {
        let engine = Arc::new(ScriptedEngine::new().rule("allow", allow_rule));
        let session = Arc::new(session(&engine));
        let baseline = session.registry().instance_count();

        let handles: Vec<_> = [("ada", "admin"), ("gus", "guest")]
            .into_iter()
            .map(|(name, role)| {
                let session = session.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| read(&session, user(name, role)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<bool>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results[0].iter().all(|allowed| *allowed));
        assert!(results[1].iter().all(|allowed| !*allowed));
        assert_eq!(engine.frees(), 100);
        assert_eq!(session.registry().instance_count(), baseline);
    }

    #[test]
    fn test_raising_method_is_application_error() {
        let engine = Arc::new(ScriptedEngine::new().rule("audited", call_rule("audit")));
        let session = session(&engine);
        let baseline = session.registry().instance_count();

        let mut query = session
            .evaluate("audited", vec![user("ada", "admin")], HashMap::new())
            .unwrap();
        let err = query.next().unwrap().unwrap_err();
        assert_eq!(
            err,
            Error::Application {
                message: "audit log unavailable".to_string(),
                class: Some("User".to_string()),
                member: Some("audit".to_string()),
            }
        );
        assert!(query.next().is_none());
        assert_eq!(engine.frees(), 1);
        assert_eq!(session.registry().instance_count(), baseline);
        assert!(matches!(engine.replies().last(), Some(Reply::ApplicationError(_))));
    }

    #[test]
    fn test_panicking_method_is_application_error() {
        let engine = Arc::new(ScriptedEngine::new().rule("exploding", call_rule("explode")));
        let session = session(&engine);
        let baseline = session.registry().instance_count();

        let mut query = session
            .evaluate("exploding", vec![user("ada", "admin")], HashMap::new())
            .unwrap();
        let err = query.next().unwrap().unwrap_err();
        assert!(
            matches!(err, Error::Application { ref message, .. } if message == "role table corrupted")
        );
        drop(query);
        assert_eq!(engine.frees(), 1);
        assert_eq!(session.registry().instance_count(), baseline);
        assert_eq!(session.metrics().telemetry.unwrap().application_errors, 1);
    }

    #[test]
    fn test_instances_constructed_by_policy_are_released() {
        let engine = Arc::new(
            ScriptedEngine::new().rule("make", |_: &[Term], _: &Bindings| {
                script(vec![
                    QueryEvent::MakeExternal {
                        instance_id: 5000,
                        constructor: Term::call(
                            "User",
                            vec![Term::string("eve"), Term::string("auditor")],
                        ),
                    },
                    QueryEvent::ExternalCall {
                        call_id: 1,
                        instance: Term::external(5000),
                        attribute: Symbol::new("name"),
                        args: None,
                        kwargs: None,
                    },
                    solution(),
                ])
            }),
        );
        let session = session(&engine);
        let baseline = session.registry().instance_count();

        let mut query = session.evaluate("make", vec![], HashMap::new()).unwrap();
        assert!(query.next().unwrap().is_ok());
        assert_eq!(session.registry().instance_count(), baseline + 1);
        assert!(query.next().is_none());
        assert_eq!(session.registry().instance_count(), baseline);
        assert_eq!(
            engine.replies(),
            vec![Reply::Call(1, Some(Term::string("eve")))]
        );
    }

    #[test]
    fn test_register_class_binds_constant() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = session(&engine);
        let constant = engine.constant("User").unwrap();
        let first_id = match constant.value() {
            Value::ExternalInstance(e) => {
                assert_eq!(e.repr.as_deref(), Some("User"));
                e.instance_id
            }
            other => panic!("expected class constant, got {:?}", other),
        };

        let class_object = session.instance(first_id).unwrap();
        assert!(class_object.downcast_ref::<ClassObject>().is_some());

        // Re-registering replaces the class and releases the old class object.
        session.register_class(user_class()).unwrap();
        assert_eq!(session.instance(first_id).unwrap_err().category(), "resource");
        assert_eq!(session.metrics().classes, 1);
    }

    #[test]
    fn test_register_constant() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = session(&engine);
        let before = session.registry().instance_count();

        session
            .register_constant("owner", &user("ada", "admin"))
            .unwrap();
        assert_eq!(session.registry().instance_count(), before + 1);

        session
            .register_constant("owner", &HostValue::Integer(7))
            .unwrap();
        assert_eq!(engine.constant("owner"), Some(Term::integer(7)));
        assert_eq!(session.registry().instance_count(), before);
    }

    #[test]
    fn test_rejected_constant_releases_its_instances() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = session(&engine);
        let before = session.registry().instance_count();

        let err = session
            .register_constant("not a name", &user("ada", "admin"))
            .unwrap_err();
        assert_eq!(err.category(), "load");
        assert_eq!(session.registry().instance_count(), before);
        assert!(engine.constant("not a name").is_none());
    }

    #[test]
    fn test_load_errors() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = session(&engine);

        let err = session.load_str("allow(x) if syntax error").unwrap_err();
        assert!(matches!(err, Error::Load { .. }));

        let err = session.load_files(&["rules.txt"]).unwrap_err();
        assert!(matches!(err, Error::Load { filename: Some(ref f), .. } if f == "rules.txt"));

        let err = session
            .evaluate_str("allow(x syntax error", HashMap::new())
            .unwrap_err();
        assert_eq!(err.category(), "load");
    }

    #[test]
    fn test_load_files_and_clear_rules() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = session(&engine);

        let dir = std::env::temp_dir().join(format!("polar-host-session-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("main.polar");
        std::fs::write(&path, "allow(_, _, _);").unwrap();

        session.load_files(&[&path]).unwrap();
        let sources = engine.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].filename, Some(path.display().to_string()));

        session.clear_rules().unwrap();
        assert!(engine.sources().is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_evaluate_str_with_bindings() {
        let engine = Arc::new(
            ScriptedEngine::new().rule("echo", |_: &[Term], bindings: &Bindings| {
                script(vec![QueryEvent::Result {
                    bindings: bindings.clone(),
                    trace: None,
                }])
            }),
        );
        let session = session(&engine);

        let mut bindings = HashMap::new();
        bindings.insert("x".to_string(), HostValue::Integer(42));
        let results: Vec<_> = session
            .evaluate_str("echo", bindings)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get_typed::<i64>("x").unwrap(), 42);
    }

    #[test]
    fn test_builder_without_engine() {
        let result = PolicySession::builder().build();
        if cfg!(not(feature = "native")) {
            assert_eq!(result.unwrap_err().category(), "config");
        }
    }

    #[test]
    fn test_builder_overrides() {
        let engine = Arc::new(ScriptedEngine::new());
        let session = PolicySession::builder()
            .with_engine(engine)
            .with_cache_enabled(false)
            .with_telemetry_enabled(false)
            .build()
            .unwrap();
        let metrics = session.metrics();
        assert!(!metrics.cache_enabled);
        assert!(metrics.telemetry.is_none());

        let err = PolicySession::builder()
            .with_engine(Arc::new(ScriptedEngine::new()))
            .with_cache_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }
}

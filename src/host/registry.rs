//! Class and instance registry.
//!
//! The registry holds the only strong reference to every host object the engine
//! knows about. The engine sees integer ids; everything else lives here.

use super::class::Class;
use super::value::Instance;
use crate::{Error, Result};

use parking_lot::{Mutex, RwLock};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of fresh instance ids.
pub type IdSource = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Who is responsible for releasing an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Registered by host code; released with `release`.
    Host,
    /// Registered while running a query; released when the query ends.
    Query,
}

struct Entry {
    instance: Instance,
    owner: Owner,
}

#[derive(Default)]
struct ClassTable {
    by_name: HashMap<String, Arc<Class>>,
    by_type: HashMap<TypeId, String>,
}

/// Process-scoped table of host classes and live instances.
///
/// One registry belongs to one session. Classes are written during setup and read
/// concurrently afterwards; instance registration and release share one lock.
pub struct Registry {
    classes: RwLock<ClassTable>,
    instances: Mutex<HashMap<u64, Entry>>,
    ids: IdSource,
}

impl Registry {
    /// Create a registry with its own id counter.
    pub fn new() -> Self {
        let counter = Arc::new(AtomicU64::new(1));
        Self::with_id_source(Arc::new(move || counter.fetch_add(1, Ordering::Relaxed)))
    }

    /// Create a registry that draws ids from `ids`, typically the engine's own
    /// counter so host ids never collide with ids the engine hands out.
    pub fn with_id_source(ids: IdSource) -> Self {
        Self {
            classes: RwLock::new(ClassTable::default()),
            instances: Mutex::new(HashMap::new()),
            ids,
        }
    }

    /// Register a class. The last registration under a name wins; the previous
    /// descriptor is returned.
    pub fn register_class(&self, class: Class) -> Option<Arc<Class>> {
        let class = Arc::new(class);
        let mut table = self.classes.write();

        let previous = table.by_name.insert(class.name.clone(), class.clone());
        if let Some(old) = &previous {
            warn!(class = %class.name, "class re-registered; replacing previous descriptor");
            if let Some(type_id) = old.type_id {
                if table.by_type.get(&type_id) == Some(&class.name) {
                    table.by_type.remove(&type_id);
                }
            }
        }
        if let Some(type_id) = class.type_id {
            if let Some(other) = table.by_type.insert(type_id, class.name.clone()) {
                if other != class.name {
                    warn!(class = %class.name, replaced = %other, "Rust type re-bound to a new class name");
                }
            }
        }
        debug!(class = %class.name, order = ?class.specializer_order, "class registered");
        previous
    }

    /// Look up a class by name.
    pub fn class(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.read().by_name.get(name).cloned()
    }

    /// Look up the class registered for an instance's Rust type.
    pub fn class_for(&self, instance: &Instance) -> Option<Arc<Class>> {
        let table = self.classes.read();
        table
            .by_type
            .get(&instance.type_id())
            .and_then(|name| table.by_name.get(name))
            .cloned()
    }

    /// Names of all registered classes.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classes.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Allocate a fresh id from the registry's id source.
    pub fn next_id(&self) -> u64 {
        (self.ids)()
    }

    /// Register an instance under a fresh id.
    pub fn register_instance(&self, instance: Instance, owner: Owner) -> u64 {
        let id = self.next_id();
        self.instances.lock().insert(id, Entry { instance, owner });
        id
    }

    /// Register an instance under an id chosen elsewhere (the engine, for `MakeExternal`).
    pub fn register_instance_with_id(&self, id: u64, instance: Instance, owner: Owner) -> Result<()> {
        let mut instances = self.instances.lock();
        if instances.contains_key(&id) {
            return Err(Error::resource(
                format!("instance id {} is already registered", id),
                id,
            ));
        }
        instances.insert(id, Entry { instance, owner });
        Ok(())
    }

    /// Resolve an id to its instance.
    ///
    /// Host-owned instances come back carrying their id so they can be passed to
    /// later queries without registering a second time.
    pub fn lookup(&self, id: u64) -> Result<Instance> {
        let instances = self.instances.lock();
        match instances.get(&id) {
            Some(Entry {
                instance,
                owner: Owner::Host,
            }) => Ok(instance.clone().with_id(id)),
            Some(entry) => Ok(entry.instance.clone()),
            None => Err(Error::resource(
                format!("unknown or released instance id {}", id),
                id,
            )),
        }
    }

    /// Whether `id` is live and refers to this exact object.
    pub fn holds(&self, id: u64, instance: &Instance) -> bool {
        self.instances
            .lock()
            .get(&id)
            .map(|entry| entry.instance.same_object(instance))
            .unwrap_or(false)
    }

    /// Release an id. Releasing an unknown or already-released id is an error.
    pub fn release(&self, id: u64) -> Result<Instance> {
        match self.instances.lock().remove(&id) {
            Some(entry) => Ok(entry.instance),
            None => Err(Error::resource(
                format!("instance id {} is not registered or was already released", id),
                id,
            )),
        }
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("classes", &self.class_names())
            .field("instances", &self.instance_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct User;
    struct Admin;

    #[test]
    fn test_register_lookup_release() {
        let registry = Registry::new();
        let instance = Instance::new(User);
        let id = registry.register_instance(instance.clone(), Owner::Host);

        let found = registry.lookup(id).unwrap();
        assert!(found.same_object(&instance));
        assert_eq!(found.id(), Some(id));

        registry.release(id).unwrap();
        let err = registry.release(id).unwrap_err();
        assert!(matches!(err, Error::Resource { instance_id: Some(i), .. } if i == id));
        assert_eq!(registry.lookup(id).unwrap_err().category(), "resource");
    }

    #[test]
    fn test_query_owned_lookup_has_no_pinned_id() {
        let registry = Registry::new();
        let id = registry.register_instance(Instance::new(User), Owner::Query);
        assert_eq!(registry.lookup(id).unwrap().id(), None);
    }

    #[test]
    fn test_ids_are_unique_and_never_reused() {
        let registry = Registry::new();
        let a = registry.register_instance(Instance::new(User), Owner::Host);
        registry.release(a).unwrap();
        let b = registry.register_instance(Instance::new(User), Owner::Host);
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_with_taken_id_fails() {
        let registry = Registry::new();
        registry
            .register_instance_with_id(40, Instance::new(User), Owner::Query)
            .unwrap();
        let err = registry
            .register_instance_with_id(40, Instance::new(User), Owner::Query)
            .unwrap_err();
        assert_eq!(err.category(), "resource");
    }

    #[test]
    fn test_last_class_registration_wins() {
        let registry = Registry::new();
        registry.register_class(Class::builder::<User>("Person").build());
        let previous = registry.register_class(
            Class::builder::<Admin>("Person")
                .with_specializers(["Staff"])
                .build(),
        );
        assert!(previous.is_some());

        let class = registry.class("Person").unwrap();
        assert_eq!(class.specializer_order(), &["Person", "Staff"]);
        assert!(registry.class_for(&Instance::new(Admin)).is_some());
        assert!(registry.class_for(&Instance::new(User)).is_none());
    }

    #[test]
    fn test_reregistration_keeps_type_bound_to_other_name() {
        let registry = Registry::new();
        registry.register_class(Class::builder::<User>("Person").build());
        registry.register_class(Class::builder::<User>("Member").build());
        registry.register_class(Class::builder::<Admin>("Person").build());

        let class = registry.class_for(&Instance::new(User)).unwrap();
        assert_eq!(class.name(), "Member");
        assert_eq!(registry.class_for(&Instance::new(Admin)).unwrap().name(), "Person");
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|_| registry.register_instance(Instance::new(User), Owner::Query))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 800);
        assert_eq!(registry.instance_count(), 800);
    }
}

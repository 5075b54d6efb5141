//! Class descriptors: the explicit method tables the dispatcher resolves against.

use super::value::{Args, HostValue, Instance, IntoHostValue};
use crate::{Error, Result};

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Iterator produced by a class's iterator hook.
pub type HostIter = Box<dyn Iterator<Item = Result<HostValue>> + Send>;

pub(crate) type Constructor = Arc<dyn Fn(Args) -> Result<Instance> + Send + Sync>;
pub(crate) type Method = Arc<dyn Fn(&Instance, Args) -> Result<HostValue> + Send + Sync>;
pub(crate) type Attribute = Arc<dyn Fn(&Instance) -> Result<HostValue> + Send + Sync>;
pub(crate) type EqualityHook = Arc<dyn Fn(&Instance, &Instance) -> Result<bool> + Send + Sync>;
pub(crate) type OrderingHook =
    Arc<dyn Fn(&Instance, &Instance) -> Result<Option<Ordering>> + Send + Sync>;
pub(crate) type IteratorHook = Arc<dyn Fn(&Instance) -> Result<HostIter> + Send + Sync>;

/// A registered host class.
///
/// `specializer_order` ranks classes from most to least specific and always starts
/// with the class itself.
#[derive(Clone)]
pub struct Class {
    pub(crate) name: String,
    pub(crate) type_id: Option<TypeId>,
    pub(crate) constructor: Option<Constructor>,
    pub(crate) attributes: HashMap<String, Attribute>,
    pub(crate) methods: HashMap<String, Method>,
    pub(crate) specializer_order: Vec<String>,
    pub(crate) equality: Option<EqualityHook>,
    pub(crate) ordering: Option<OrderingHook>,
    pub(crate) iterator: Option<IteratorHook>,
}

impl Class {
    /// Start describing the class for Rust type `T`.
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder::new(name)
    }

    /// Start describing a class with no Rust type of its own, used only as a specializer
    /// and as a home for methods shared by its subclasses.
    pub fn abstract_class(name: impl Into<String>) -> ClassBuilder<()> {
        let mut builder = ClassBuilder::<()>::new(name);
        builder.class.type_id = None;
        builder
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classes from most to least specific, starting with this one.
    pub fn specializer_order(&self) -> &[String] {
        &self.specializer_order
    }

    /// Whether this class is `other` or specializes it.
    pub fn is_subclass_of(&self, other: &str) -> bool {
        self.specializer_order.iter().any(|c| c == other)
    }

    /// Position of `class` in the specializer order.
    pub fn specificity(&self, class: &str) -> Option<usize> {
        self.specializer_order.iter().position(|c| c == class)
    }

    /// Whether the class defines an attribute getter with this name.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Whether the class defines a method with this name.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Whether instances can be built by the engine.
    pub fn is_constructible(&self) -> bool {
        self.constructor.is_some()
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attributes: Vec<_> = self.attributes.keys().collect();
        attributes.sort();
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("attributes", &attributes)
            .field("methods", &methods)
            .field("specializer_order", &self.specializer_order)
            .finish()
    }
}

fn receiver<'a, T: Any>(instance: &'a Instance, class: &str, member: &str) -> Result<&'a T> {
    instance.downcast_ref::<T>().ok_or_else(|| {
        Error::protocol(format!(
            "{}.{} cannot receive an instance of {}",
            class,
            member,
            instance.type_name()
        ))
    })
}

/// Builder for a [`Class`] whose instances are Rust values of type `T`.
pub struct ClassBuilder<T> {
    class: Class,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    /// Create a builder for class `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            class: Class {
                specializer_order: vec![name.clone()],
                name,
                type_id: Some(TypeId::of::<T>()),
                constructor: None,
                attributes: HashMap::new(),
                methods: HashMap::new(),
                equality: None,
                ordering: None,
                iterator: None,
            },
            _marker: PhantomData,
        }
    }

    /// Set the constructor used by `MakeExternal`.
    pub fn with_constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
    {
        self.class.constructor = Some(Arc::new(move |args: Args| f(args).map(Instance::new)));
        self
    }

    /// Add a field accessor.
    pub fn add_attribute_getter<F, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHostValue,
    {
        let name = name.into();
        let class = self.class.name.clone();
        let member = name.clone();
        self.class.attributes.insert(
            name,
            Arc::new(move |instance: &Instance| {
                let this = receiver::<T>(instance, &class, &member)?;
                f(this).into_host_value()
            }),
        );
        self
    }

    /// Add a method taking positional arguments.
    pub fn add_method<F, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T, Args) -> R + Send + Sync + 'static,
        R: IntoHostValue,
    {
        let name = name.into();
        let class = self.class.name.clone();
        let member = name.clone();
        self.class.methods.insert(
            name,
            Arc::new(move |instance: &Instance, args: Args| {
                let this = receiver::<T>(instance, &class, &member)?;
                f(this, args).into_host_value()
            }),
        );
        self
    }

    /// Add a method that receives the untyped instance.
    ///
    /// Useful on abstract classes, whose methods run against instances of
    /// many concrete types.
    pub fn add_instance_method<F, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Instance, Args) -> R + Send + Sync + 'static,
        R: IntoHostValue,
    {
        self.class
            .methods
            .insert(
                name.into(),
                Arc::new(move |instance: &Instance, args: Args| f(instance, args).into_host_value()),
            );
        self
    }

    /// Set the less-specific classes this class specializes, most specific first.
    pub fn with_specializers<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut order = vec![self.class.name.clone()];
        for parent in parents {
            let parent = parent.into();
            if !order.contains(&parent) {
                order.push(parent);
            }
        }
        self.class.specializer_order = order;
        self
    }

    /// Use `T`'s iterator for `NextExternal` over instances of this class.
    pub fn with_iter<F, I>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: IntoHostValue + 'static,
    {
        let class = self.class.name.clone();
        self.class.iterator = Some(Arc::new(move |instance: &Instance| {
            let this = receiver::<T>(instance, &class, "__iter__")?;
            let iter = f(this).into_iter().map(IntoHostValue::into_host_value);
            Ok(Box::new(iter) as HostIter)
        }));
        self
    }

    /// Build the class descriptor.
    pub fn build(self) -> Class {
        self.class
    }
}

impl<T: Any + Send + Sync + PartialEq> ClassBuilder<T> {
    /// Compare instances with `T`'s `PartialEq` when the engine unifies them.
    pub fn with_equality_check(mut self) -> Self {
        let class = self.class.name.clone();
        self.class.equality = Some(Arc::new(move |left: &Instance, right: &Instance| {
            let left = receiver::<T>(left, &class, "==")?;
            match right.downcast_ref::<T>() {
                Some(right) => Ok(left == right),
                None => Ok(false),
            }
        }));
        self
    }
}

impl<T: Any + Send + Sync + PartialOrd> ClassBuilder<T> {
    /// Order instances with `T`'s `PartialOrd` for comparison operators.
    pub fn with_ordering(mut self) -> Self {
        let class = self.class.name.clone();
        self.class.ordering = Some(Arc::new(move |left: &Instance, right: &Instance| {
            let left = receiver::<T>(left, &class, "<")?;
            match right.downcast_ref::<T>() {
                Some(right) => Ok(left.partial_cmp(right)),
                None => Ok(None),
            }
        }));
        self
    }
}

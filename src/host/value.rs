//! Host-side values and conversions to and from Rust types.

use crate::{Error, Result};

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A host value as seen by the marshaler.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Signed integer
    Integer(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// Boolean
    Boolean(bool),
    /// List
    List(Vec<HostValue>),
    /// String-keyed map, in key order
    Map(BTreeMap<String, HostValue>),
    /// Unbound variable, by name
    Variable(String),
    /// Host object
    Instance(Instance),
}

impl HostValue {
    /// Wrap any host object as an instance value.
    pub fn instance<T: Any + Send + Sync>(value: T) -> Self {
        HostValue::Instance(Instance::new(value))
    }

    /// Short name of the value's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Integer(_) => "Integer",
            HostValue::Float(_) => "Float",
            HostValue::String(_) => "String",
            HostValue::Boolean(_) => "Boolean",
            HostValue::List(_) => "List",
            HostValue::Map(_) => "Dictionary",
            HostValue::Variable(_) => "Variable",
            HostValue::Instance(_) => "Instance",
        }
    }

    /// Render as JSON for display. Instances show their type name and id.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            HostValue::Integer(i) => json!(i),
            HostValue::Float(f) => json!(f),
            HostValue::String(s) => json!(s),
            HostValue::Boolean(b) => json!(b),
            HostValue::List(items) => {
                serde_json::Value::Array(items.iter().map(HostValue::to_json).collect())
            }
            HostValue::Map(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            HostValue::Variable(name) => json!({ "variable": name }),
            HostValue::Instance(instance) => {
                json!({ "instance": instance.type_name(), "id": instance.id() })
            }
        }
    }
}

/// A shared reference to a host object.
///
/// The object itself never crosses the boundary; the engine only sees the id the
/// registry assigns. `id` is set for instances the host registered explicitly.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    id: Option<u64>,
}

impl Instance {
    /// Wrap a host object.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared host object.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            type_name: std::any::type_name::<T>(),
            id: None,
        }
    }

    /// Concrete type of the wrapped object.
    pub fn type_id(&self) -> TypeId {
        Any::type_id(&*self.inner)
    }

    /// Rust type name of the wrapped object.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Registry id, for instances registered by the host.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub(crate) fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Borrow the object as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Share the object as `T`, failing with a marshal error on type mismatch.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.inner.clone().downcast::<T>().map_err(|_| {
            Error::marshal_kind(
                format!(
                    "instance of {} is not a {}",
                    self.type_name,
                    std::any::type_name::<T>()
                ),
                self.type_name,
            )
        })
    }

    /// Whether both references point at the same object.
    pub fn same_object(&self, other: &Instance) -> bool {
        Arc::as_ptr(&self.inner) as *const () == Arc::as_ptr(&other.inner) as *const ()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_name)
            .field("id", &self.id)
            .finish()
    }
}

/// Conversion from a Rust value into a host value.
///
/// Fails with a marshal error for values that cannot be represented, and with an
/// application error when converting an `Err` returned by host code.
pub trait IntoHostValue {
    /// Convert into a host value.
    fn into_host_value(self) -> Result<HostValue>;
}

/// Conversion from a host value into a Rust value.
pub trait FromHostValue: Sized {
    /// Convert from a host value, failing with a marshal error on kind mismatch.
    fn from_host_value(value: HostValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &HostValue) -> Result<T> {
    Err(Error::marshal_kind(
        format!("expected {}, got {}", expected, value.kind()),
        value.kind(),
    ))
}

impl IntoHostValue for HostValue {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(self)
    }
}

impl FromHostValue for HostValue {
    fn from_host_value(value: HostValue) -> Result<Self> {
        Ok(value)
    }
}

macro_rules! lossless_integer {
    ($($t:ty),*) => {
        $(
            impl IntoHostValue for $t {
                fn into_host_value(self) -> Result<HostValue> {
                    Ok(HostValue::Integer(i64::from(self)))
                }
            }
        )*
    };
}

lossless_integer!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! checked_integer {
    ($($t:ty),*) => {
        $(
            impl IntoHostValue for $t {
                fn into_host_value(self) -> Result<HostValue> {
                    i64::try_from(self).map(HostValue::Integer).map_err(|_| {
                        Error::marshal_kind(
                            format!("{} does not fit in a 64-bit signed integer", self),
                            stringify!($t),
                        )
                    })
                }
            }

            impl FromHostValue for $t {
                fn from_host_value(value: HostValue) -> Result<Self> {
                    match value {
                        HostValue::Integer(i) => <$t>::try_from(i).map_err(|_| {
                            Error::marshal_kind(
                                format!("{} is out of range for {}", i, stringify!($t)),
                                "Integer",
                            )
                        }),
                        other => mismatch("Integer", &other),
                    }
                }
            }
        )*
    };
}

checked_integer!(u64, usize);

impl FromHostValue for i64 {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Integer(i) => Ok(i),
            other => mismatch("Integer", &other),
        }
    }
}

impl FromHostValue for i32 {
    fn from_host_value(value: HostValue) -> Result<Self> {
        let i = i64::from_host_value(value)?;
        i32::try_from(i)
            .map_err(|_| Error::marshal_kind(format!("{} is out of range for i32", i), "Integer"))
    }
}

impl FromHostValue for u32 {
    fn from_host_value(value: HostValue) -> Result<Self> {
        let i = i64::from_host_value(value)?;
        u32::try_from(i)
            .map_err(|_| Error::marshal_kind(format!("{} is out of range for u32", i), "Integer"))
    }
}

impl IntoHostValue for f64 {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(HostValue::Float(self))
    }
}

impl IntoHostValue for f32 {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(HostValue::Float(f64::from(self)))
    }
}

impl FromHostValue for f64 {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Float(f) => Ok(f),
            HostValue::Integer(i) => Ok(i as f64),
            other => mismatch("Float", &other),
        }
    }
}

impl IntoHostValue for bool {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(HostValue::Boolean(self))
    }
}

impl FromHostValue for bool {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Boolean(b) => Ok(b),
            other => mismatch("Boolean", &other),
        }
    }
}

impl IntoHostValue for String {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(HostValue::String(self))
    }
}

impl IntoHostValue for &str {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(HostValue::String(self.to_string()))
    }
}

impl FromHostValue for String {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::String(s) => Ok(s),
            other => mismatch("String", &other),
        }
    }
}

impl IntoHostValue for Instance {
    fn into_host_value(self) -> Result<HostValue> {
        Ok(HostValue::Instance(self))
    }
}

impl FromHostValue for Instance {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Instance(instance) => Ok(instance),
            other => mismatch("Instance", &other),
        }
    }
}

impl<T: IntoHostValue> IntoHostValue for Vec<T> {
    fn into_host_value(self) -> Result<HostValue> {
        self.into_iter()
            .map(IntoHostValue::into_host_value)
            .collect::<Result<Vec<_>>>()
            .map(HostValue::List)
    }
}

impl<T: FromHostValue> FromHostValue for Vec<T> {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::List(items) => items.into_iter().map(T::from_host_value).collect(),
            other => mismatch("List", &other),
        }
    }
}

impl<T: IntoHostValue> IntoHostValue for BTreeMap<String, T> {
    fn into_host_value(self) -> Result<HostValue> {
        self.into_iter()
            .map(|(k, v)| Ok((k, v.into_host_value()?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(HostValue::Map)
    }
}

impl<T: IntoHostValue> IntoHostValue for HashMap<String, T> {
    fn into_host_value(self) -> Result<HostValue> {
        self.into_iter()
            .map(|(k, v)| Ok((k, v.into_host_value()?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(HostValue::Map)
    }
}

impl<T: FromHostValue> FromHostValue for BTreeMap<String, T> {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Map(fields) => fields
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_host_value(v)?)))
                .collect(),
            other => mismatch("Dictionary", &other),
        }
    }
}

impl<T: FromHostValue> FromHostValue for HashMap<String, T> {
    fn from_host_value(value: HostValue) -> Result<Self> {
        match value {
            HostValue::Map(fields) => fields
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_host_value(v)?)))
                .collect(),
            other => mismatch("Dictionary", &other),
        }
    }
}

impl<T: IntoHostValue, E: fmt::Display> IntoHostValue for std::result::Result<T, E> {
    fn into_host_value(self) -> Result<HostValue> {
        match self {
            Ok(value) => value.into_host_value(),
            Err(e) => Err(Error::application(e.to_string())),
        }
    }
}

/// Positional arguments passed to a host method or constructor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<HostValue>);

impl Args {
    /// Wrap argument values.
    pub fn new(values: Vec<HostValue>) -> Self {
        Self(values)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert the argument at `index`.
    pub fn get<T: FromHostValue>(&self, index: usize) -> Result<T> {
        match self.0.get(index) {
            Some(value) => T::from_host_value(value.clone()),
            None => Err(Error::application(format!(
                "missing argument {} (got {})",
                index,
                self.0.len()
            ))),
        }
    }

    /// Share the instance argument at `index` as `T`.
    pub fn instance<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        self.get::<Instance>(index)?.downcast::<T>()
    }

    /// Borrow the raw values.
    pub fn values(&self) -> &[HostValue] {
        &self.0
    }

    /// Take the raw values.
    pub fn into_inner(self) -> Vec<HostValue> {
        self.0
    }
}

//! Query solutions.

use crate::host::{FromHostValue, HostValue};
use crate::{Error, Result};

use std::collections::BTreeMap;

/// One solution: the query's variables bound to host values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    bindings: BTreeMap<String, HostValue>,
}

impl ResultSet {
    /// Wrap unmarshaled bindings.
    pub fn new(bindings: BTreeMap<String, HostValue>) -> Self {
        Self { bindings }
    }

    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.bindings.get(name)
    }

    /// Value bound to `name`, converted to `T`.
    pub fn get_typed<T: FromHostValue>(&self, name: &str) -> Result<T> {
        match self.bindings.get(name) {
            Some(value) => T::from_host_value(value.clone()),
            None => Err(Error::marshal(format!("no binding for variable {}", name))),
        }
    }

    /// Bound variable names, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Number of bound variables.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the solution binds nothing.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Take the bindings.
    pub fn into_map(self) -> BTreeMap<String, HostValue> {
        self.bindings
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let mut bindings = BTreeMap::new();
        bindings.insert("x".to_string(), HostValue::Integer(4));
        bindings.insert("name".to_string(), HostValue::String("ada".into()));
        let result = ResultSet::new(bindings);

        assert_eq!(result.get_typed::<i64>("x").unwrap(), 4);
        assert_eq!(result.get_typed::<String>("name").unwrap(), "ada");
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["name", "x"]);
        assert_eq!(result.get_typed::<i64>("y").unwrap_err().category(), "marshal");
        assert!(result.get_typed::<bool>("x").is_err());
    }

    #[test]
    fn test_to_json() {
        let mut bindings = BTreeMap::new();
        bindings.insert("x".to_string(), HostValue::List(vec![HostValue::Boolean(true)]));
        let result = ResultSet::new(bindings);
        assert_eq!(result.to_json(), serde_json::json!({ "x": [true] }));
    }
}

//! Ordered metadata maps.
//!
//! Pipeline reports and requests are metadata maps: string keys bound
//! to either a variant array (scalars are length-1 arrays) or a
//! nested map. Insertion order is preserved so that serialization is
//! deterministic.

use std::collections::HashMap;

use num_traits::NumCast;

use crate::array::VariantArray;

/// A metadata value: a variant array or a nested map.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Array(VariantArray),
    Map(Metadata),
}

impl Property {
    /// The array payload, if this property is one.
    pub fn as_array(&self) -> Option<&VariantArray> {
        match self {
            Property::Array(a) => Some(a),
            Property::Map(_) => None,
        }
    }

    /// The nested map payload, if this property is one.
    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Property::Array(_) => None,
            Property::Map(m) => Some(m),
        }
    }
}

impl From<VariantArray> for Property {
    fn from(a: VariantArray) -> Self {
        Property::Array(a)
    }
}

impl From<Metadata> for Property {
    fn from(m: Metadata) -> Self {
        Property::Map(m)
    }
}

impl From<&str> for Property {
    fn from(s: &str) -> Self {
        Property::Array(VariantArray::Str(vec![s.to_string()]))
    }
}

impl From<String> for Property {
    fn from(s: String) -> Self {
        Property::Array(VariantArray::Str(vec![s]))
    }
}

macro_rules! impl_property_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Property {
                fn from(v: $ty) -> Self {
                    Property::Array(VariantArray::from(vec![v]))
                }
            }
            impl From<Vec<$ty>> for Property {
                fn from(v: Vec<$ty>) -> Self {
                    Property::Array(VariantArray::from(v))
                }
            }
            impl From<&[$ty]> for Property {
                fn from(v: &[$ty]) -> Self {
                    Property::Array(VariantArray::from(v.to_vec()))
                }
            }
        )*
    };
}

impl_property_from_scalar!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl From<Vec<String>> for Property {
    fn from(v: Vec<String>) -> Self {
        Property::Array(VariantArray::Str(v))
    }
}

impl From<&[String]> for Property {
    fn from(v: &[String]) -> Self {
        Property::Array(VariantArray::Str(v.to_vec()))
    }
}

/// Ordered mapping from string keys to properties.
///
/// Keys are unique; re-inserting a key replaces the value but keeps
/// the original position. A map is "empty" iff it has zero keys.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    order: Vec<String>,
    values: HashMap<String, Property>,
}

impl Metadata {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property.
    pub fn insert<P: Into<Property>>(&mut self, key: &str, value: P) {
        if !self.values.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.values.insert(key.to_string(), value.into());
    }

    /// Fetch a property by key.
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.values.get(key)
    }

    /// Fetch the array stored under `key`.
    pub fn get_array(&self, key: &str) -> Option<&VariantArray> {
        self.get(key).and_then(Property::as_array)
    }

    /// Fetch the nested map stored under `key`.
    pub fn get_metadata(&self, key: &str) -> Option<&Metadata> {
        self.get(key).and_then(Property::as_map)
    }

    /// Fetch the first element under `key`, coerced to `T`.
    pub fn get_scalar<T: NumCast>(&self, key: &str) -> Option<T> {
        self.get_array(key).and_then(|a| a.get(0))
    }

    /// Fetch all elements under `key`, coerced to `T`.
    pub fn get_vec<T: NumCast>(&self, key: &str) -> Option<Vec<T>> {
        let arr = self.get_array(key)?;
        (0..arr.len()).map(|i| arr.get(i)).collect()
    }

    /// Fetch the first string element under `key`.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get_array(key).and_then(|a| a.get_str(0))
    }

    /// Fetch all string elements under `key`.
    pub fn get_strings(&self, key: &str) -> Option<Vec<String>> {
        match self.get_array(key)? {
            VariantArray::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Remove a key, returning its property.
    pub fn remove(&mut self, key: &str) -> Option<Property> {
        let prop = self.values.remove(key)?;
        self.order.retain(|k| k != key);
        Some(prop)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|k| k.as_str())
    }

    /// (key, property) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.order
            .iter()
            .filter_map(|k| self.values.get(k).map(|p| (k.as_str(), p)))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// A map is empty iff it has zero keys.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop all keys.
    pub fn clear(&mut self) {
        self.order.clear();
        self.values.clear();
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
            && self
                .order
                .iter()
                .all(|k| self.values.get(k) == other.values.get(k))
    }
}

impl std::fmt::Display for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn fmt_inner(
            md: &Metadata,
            f: &mut std::fmt::Formatter<'_>,
            indent: usize,
        ) -> std::fmt::Result {
            for (key, prop) in md.iter() {
                match prop {
                    Property::Array(a) => {
                        writeln!(f, "{:indent$}{} = {:?}", "", key, a, indent = indent)?
                    }
                    Property::Map(m) => {
                        writeln!(f, "{:indent$}{}:", "", key, indent = indent)?;
                        fmt_inner(m, f, indent + 2)?;
                    }
                }
            }
            Ok(())
        }
        fmt_inner(self, f, 0)
    }
}

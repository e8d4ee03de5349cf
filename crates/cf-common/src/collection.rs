//! Ordered, named sets of shared variant arrays.

use std::sync::{Arc, RwLock};

use crate::array::VariantArray;

/// A variant array shared between datasets. Shallow mesh copies alias
/// these; writers take the lock.
pub type ArrayRef = Arc<RwLock<VariantArray>>;

/// Wrap an owned array for sharing.
pub fn shared(array: VariantArray) -> ArrayRef {
    Arc::new(RwLock::new(array))
}

/// Clone the contents of a shared array.
pub fn unshared(array: &ArrayRef) -> VariantArray {
    match array.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Ordered mapping from array name to shared variant array.
///
/// Names are unique; appending an existing name replaces the array
/// but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct ArrayCollection {
    names: Vec<String>,
    arrays: Vec<ArrayRef>,
}

impl ArrayCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an array under `name`.
    pub fn append(&mut self, name: &str, array: ArrayRef) {
        if let Some(i) = self.index_of(name) {
            self.arrays[i] = array;
        } else {
            self.names.push(name.to_string());
            self.arrays.push(array);
        }
    }

    /// Fetch an array by name.
    pub fn get(&self, name: &str) -> Option<&ArrayRef> {
        self.index_of(name).map(|i| &self.arrays[i])
    }

    /// Fetch an array by position.
    pub fn get_index(&self, i: usize) -> Option<&ArrayRef> {
        self.arrays.get(i)
    }

    /// Fetch a name by position.
    pub fn name(&self, i: usize) -> Option<&str> {
        self.names.get(i).map(|n| n.as_str())
    }

    /// Position of `name`, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Number of arrays.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the collection holds no arrays.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// (name, array) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayRef)> {
        self.names
            .iter()
            .map(|n| n.as_str())
            .zip(self.arrays.iter())
    }

    /// Drop all arrays.
    pub fn clear(&mut self) {
        self.names.clear();
        self.arrays.clear();
    }

    /// Clone with duplicated array buffers (no aliasing).
    pub fn deep_copy(&self) -> ArrayCollection {
        let mut out = ArrayCollection::new();
        for (name, array) in self.iter() {
            out.append(name, shared(unshared(array)));
        }
        out
    }
}

impl PartialEq for ArrayCollection {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
            && self
                .arrays
                .iter()
                .zip(other.arrays.iter())
                .all(|(a, b)| unshared(a) == unshared(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_get_order() {
        let mut c = ArrayCollection::new();
        c.append("T", shared(VariantArray::from(vec![1.0f32])));
        c.append("U", shared(VariantArray::from(vec![2.0f32])));
        assert_eq!(c.len(), 2);
        assert_eq!(c.name(0), Some("T"));
        assert_eq!(c.name(1), Some("U"));
        assert!(c.get("T").is_some());
        assert!(c.get("V").is_none());

        // replacement keeps position
        c.append("T", shared(VariantArray::from(vec![9.0f32])));
        assert_eq!(c.len(), 2);
        assert_eq!(c.name(0), Some("T"));
        assert_eq!(unshared(c.get("T").unwrap()).get::<f32>(0), Some(9.0));
    }

    #[test]
    fn test_shallow_clone_aliases_deep_copy_does_not() {
        let mut c = ArrayCollection::new();
        c.append("T", shared(VariantArray::from(vec![1.0f64, 2.0])));

        let aliased = c.clone();
        let detached = c.deep_copy();

        aliased
            .get("T")
            .unwrap()
            .write()
            .unwrap()
            .set(0, 42.0f64)
            .unwrap();

        assert_eq!(unshared(c.get("T").unwrap()).get::<f64>(0), Some(42.0));
        assert_eq!(
            unshared(detached.get("T").unwrap()).get::<f64>(0),
            Some(1.0)
        );
    }
}

//! Per-execution identity map.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::InstanceRef;

/// Instances keyed by (entity type, key).
///
/// One map lives for one query execution; concurrent include loads share it.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: Mutex<HashMap<(String, String), InstanceRef>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str, key: &str) -> Option<InstanceRef> {
        self.entries
            .lock()
            .get(&(type_name.to_string(), key.to_string()))
            .cloned()
    }

    /// Register an instance; when another one won the race, that one is
    /// returned and `instance` is dropped.
    pub fn register(&self, type_name: &str, key: &str, instance: InstanceRef) -> InstanceRef {
        self.entries
            .lock()
            .entry((type_name.to_string(), key.to_string()))
            .or_insert(instance)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::Instance;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn test_first_registration_wins() {
        let map = IdentityMap::new();
        let first = Arc::new(Instance::new("Customer", Some("c1".into()), None, BTreeMap::new()));
        let second = Arc::new(Instance::new("Customer", Some("c1".into()), None, BTreeMap::new()));

        let registered = map.register("Customer", "c1", first.clone());
        assert!(Arc::ptr_eq(&registered, &first));
        let registered = map.register("Customer", "c1", second);
        assert!(Arc::ptr_eq(&registered, &first));

        assert_eq!(map.len(), 1);
        assert!(map.get("Customer", "c1").is_some());
        assert!(map.get("Order", "c1").is_none());
    }
}

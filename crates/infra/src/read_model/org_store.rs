use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use shopledger_core::OrganizationId;
use std::sync::Arc;

/// Organization-isolated key/value store for disposable read models.
pub trait OrgStore<K, V>: Send + Sync {
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V>;
    fn upsert(&self, organization_id: OrganizationId, key: K, value: V);
    fn remove(&self, organization_id: OrganizationId, key: &K);
    fn list(&self, organization_id: OrganizationId) -> Vec<V>;
    /// Clear all records of one organization (rebuild support).
    fn clear_organization(&self, organization_id: OrganizationId);
}

impl<K, V, S> OrgStore<K, V> for Arc<S>
where
    S: OrgStore<K, V> + ?Sized,
{
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V> {
        (**self).get(organization_id, key)
    }

    fn upsert(&self, organization_id: OrganizationId, key: K, value: V) {
        (**self).upsert(organization_id, key, value)
    }

    fn remove(&self, organization_id: OrganizationId, key: &K) {
        (**self).remove(organization_id, key)
    }

    fn list(&self, organization_id: OrganizationId) -> Vec<V> {
        (**self).list(organization_id)
    }

    fn clear_organization(&self, organization_id: OrganizationId) {
        (**self).clear_organization(organization_id)
    }
}

/// In-memory organization-isolated store.
#[derive(Debug)]
pub struct InMemoryOrgStore<K, V> {
    inner: RwLock<HashMap<(OrganizationId, K), V>>,
}

impl<K, V> InMemoryOrgStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryOrgStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OrgStore<K, V> for InMemoryOrgStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, organization_id: OrganizationId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(organization_id, key.clone())).cloned()
    }

    fn upsert(&self, organization_id: OrganizationId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((organization_id, key), value);
        }
    }

    fn remove(&self, organization_id: OrganizationId, key: &K) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&(organization_id, key.clone()));
        }
    }

    fn list(&self, organization_id: OrganizationId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((o, _k), v)| if *o == organization_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_organization(&self, organization_id: OrganizationId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(o, _k), _v| *o != organization_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organizations_do_not_see_each_other() {
        let store: InMemoryOrgStore<u32, &'static str> = InMemoryOrgStore::new();
        let a = OrganizationId::new();
        let b = OrganizationId::new();
        store.upsert(a, 1, "a1");
        store.upsert(b, 1, "b1");

        assert_eq!(store.get(a, &1), Some("a1"));
        assert_eq!(store.list(b), vec!["b1"]);

        store.clear_organization(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.get(b, &1), Some("b1"));
    }
}

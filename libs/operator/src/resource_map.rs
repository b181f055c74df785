use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use resourcegroup_api::{Condition, GroupKind, GroupRef, ResourceRef, Status};

/// Per-resource status snapshot computed by the status readers on every
/// informer event and read back during group status reconciliation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedStatus {
    pub status: Status,
    pub conditions: Vec<Condition>,
    pub source_hash: String,
    pub inventory_id: String,
}

/// Bidirectional index between groups and the resources they claim, plus a
/// kind index for the watch manager and the per-resource status cache.
/// All indexes are updated under one lock; readers never observe a partial
/// swap.
#[derive(Default)]
pub struct ResourceMap {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    group_resources: HashMap<GroupRef, HashSet<ResourceRef>>,
    resource_groups: HashMap<ResourceRef, HashSet<GroupRef>>,
    kind_resources: HashMap<GroupKind, HashSet<ResourceRef>>,
    resource_status: HashMap<ResourceRef, CachedStatus>,
}

impl Inner {
    fn assign(&mut self, group: &GroupRef, resource: ResourceRef) {
        self.resource_groups
            .entry(resource.clone())
            .or_default()
            .insert(group.clone());
        self.kind_resources
            .entry(resource.group_kind())
            .or_default()
            .insert(resource);
    }

    /// Drops the group from the resource's owner set. A resource losing its
    /// last owner is removed from every index, including the status cache.
    fn unassign(&mut self, group: &GroupRef, resource: &ResourceRef) {
        let orphaned = match self.resource_groups.get_mut(resource) {
            Some(owners) => {
                owners.remove(group);
                owners.is_empty()
            }
            None => return,
        };
        if !orphaned {
            return;
        }
        self.resource_groups.remove(resource);
        self.resource_status.remove(resource);
        let kind = resource.group_kind();
        if let Some(members) = self.kind_resources.get_mut(&kind) {
            members.remove(resource);
            if members.is_empty() {
                self.kind_resources.remove(&kind);
            }
        }
    }

    fn kind_populated(&self, kind: &GroupKind) -> bool {
        self.kind_resources
            .get(kind)
            .is_some_and(|members| !members.is_empty())
    }
}

impl ResourceMap {
    /// Replace the group's resource set with `resources`, or drop the group
    /// entirely when `deleted`. Returns the kinds whose population crossed
    /// zero in either direction; this is the signal that the watch set needs
    /// updating.
    pub fn reconcile(
        &self,
        group: GroupRef,
        resources: Vec<ResourceRef>,
        deleted: bool,
    ) -> Vec<GroupKind> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let desired: HashSet<ResourceRef> = resources.into_iter().collect();
        let previous = inner.group_resources.get(&group).cloned().unwrap_or_default();
        let to_add: Vec<ResourceRef> = desired.difference(&previous).cloned().collect();
        let to_delete: Vec<ResourceRef> = previous.difference(&desired).cloned().collect();

        let touched: HashSet<GroupKind> = to_add
            .iter()
            .chain(to_delete.iter())
            .map(ResourceRef::group_kind)
            .collect();
        let populated_before: HashMap<GroupKind, bool> = touched
            .iter()
            .map(|kind| (kind.clone(), inner.kind_populated(kind)))
            .collect();

        for resource in to_delete {
            inner.unassign(&group, &resource);
        }
        for resource in to_add {
            inner.assign(&group, resource);
        }
        if deleted {
            inner.group_resources.remove(&group);
        } else {
            inner.group_resources.insert(group, desired);
        }

        let mut changed: Vec<GroupKind> = touched
            .into_iter()
            .filter(|kind| populated_before[kind] != inner.kind_populated(kind))
            .collect();
        changed.sort();
        changed
    }

    /// Cache the status of a tracked resource. Untracked resources are
    /// ignored so stale informer events cannot grow the cache.
    pub fn set_status(&self, resource: &ResourceRef, status: CachedStatus) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.resource_groups.contains_key(resource) {
            inner.resource_status.insert(resource.clone(), status);
        }
    }

    pub fn get_status(&self, resource: &ResourceRef) -> Option<CachedStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resource_status
            .get(resource)
            .cloned()
    }

    pub fn remove_status(&self, resource: &ResourceRef) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .resource_status
            .remove(resource);
    }

    /// Groups currently claiming the resource, in stable order.
    pub fn groups_for(&self, resource: &ResourceRef) -> Vec<GroupRef> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut groups: Vec<GroupRef> = inner
            .resource_groups
            .get(resource)
            .map(|owners| owners.iter().cloned().collect())
            .unwrap_or_default();
        groups.sort();
        groups
    }

    /// Kinds referenced by at least one group; the desired watch set.
    pub fn kinds_in_use(&self) -> HashSet<GroupKind> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .kind_resources
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(kind, _)| kind.clone())
            .collect()
    }

    pub fn has_resource(&self, resource: &ResourceRef) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resource_groups
            .contains_key(resource)
    }

    pub fn has_group(&self, group: &GroupRef) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .group_resources
            .contains_key(group)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.group_resources.is_empty() && inner.resource_groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> ResourceRef {
        ResourceRef {
            group: "group1".to_string(),
            kind: "Service".to_string(),
            namespace: "ns1".to_string(),
            name: name.to_string(),
        }
    }

    fn group(name: &str) -> GroupRef {
        GroupRef {
            namespace: "test-ns".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_reconcile_maintains_bidirectional_index() {
        let map = ResourceMap::default();
        assert!(map.is_empty());

        let res1 = service("res1");
        let res2 = service("res2");
        let res3 = service("res3");
        let kind = res1.group_kind();
        let group1 = group("group1");
        let group2 = group("group2");

        // First reference of a kind brings its population above zero.
        let changed = map.reconcile(group1.clone(), vec![res1.clone(), res2.clone()], false);
        assert_eq!(changed, vec![kind.clone()]);
        assert!(!map.is_empty());
        assert!(map.has_group(&group1));
        assert!(!map.has_group(&group2));
        assert!(map.has_resource(&res1));
        assert!(!map.has_resource(&res3));
        assert_eq!(map.groups_for(&res1), vec![group1.clone()]);
        assert_eq!(map.kinds_in_use().len(), 1);

        map.set_status(
            &res1,
            CachedStatus {
                status: Status::Current,
                ..Default::default()
            },
        );
        map.set_status(
            &res2,
            CachedStatus {
                status: Status::InProgress,
                ..Default::default()
            },
        );

        // Already-populated kind stays off the work list.
        let changed = map.reconcile(group2.clone(), vec![res1.clone(), res3.clone()], false);
        assert!(changed.is_empty());
        assert_eq!(map.groups_for(&res1), vec![group1.clone(), group2.clone()]);
        assert_eq!(map.get_status(&res1).unwrap().status, Status::Current);
        assert_eq!(map.get_status(&res2).unwrap().status, Status::InProgress);
        assert_eq!(map.get_status(&res3), None);

        // res1 leaves group1 but survives through group2.
        let changed = map.reconcile(group1.clone(), vec![res2.clone()], false);
        assert!(changed.is_empty());
        assert!(map.has_resource(&res1));
        assert_eq!(map.groups_for(&res1), vec![group2.clone()]);

        // Emptying group1 orphans res2: gone from every index, status purged.
        let changed = map.reconcile(group1.clone(), vec![], false);
        assert!(changed.is_empty());
        assert!(map.has_group(&group1));
        assert!(!map.has_resource(&res2));
        assert_eq!(map.get_status(&res2), None);
        assert_eq!(map.kinds_in_use().len(), 1);

        // Emptying group2 drops the kind population to zero.
        let changed = map.reconcile(group2.clone(), vec![], false);
        assert_eq!(changed, vec![kind.clone()]);
        assert!(map.kinds_in_use().is_empty());
        assert_eq!(map.get_status(&res1), None);

        map.reconcile(group1.clone(), vec![], true);
        assert!(!map.has_group(&group1));
        map.reconcile(group2.clone(), vec![], true);
        assert!(map.is_empty());
    }

    #[test]
    fn test_reconcile_then_delete_restores_initial_state() {
        let map = ResourceMap::default();
        let res1 = service("res1");
        let group1 = group("group1");

        let changed = map.reconcile(group1.clone(), vec![res1.clone()], false);
        assert_eq!(changed, vec![res1.group_kind()]);
        map.set_status(
            &res1,
            CachedStatus {
                status: Status::Current,
                ..Default::default()
            },
        );

        let changed = map.reconcile(group1.clone(), vec![], true);
        assert_eq!(changed, vec![res1.group_kind()]);
        assert!(map.is_empty());
        assert_eq!(map.get_status(&res1), None);
        assert!(map.kinds_in_use().is_empty());
    }

    #[test]
    fn test_reconcile_coerces_duplicates_to_a_set() {
        let map = ResourceMap::default();
        let res1 = service("res1");
        let group1 = group("group1");

        map.reconcile(group1.clone(), vec![res1.clone(), res1.clone()], false);
        assert_eq!(map.groups_for(&res1), vec![group1.clone()]);

        let changed = map.reconcile(group1, vec![], true);
        assert_eq!(changed, vec![res1.group_kind()]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_set_status_ignores_untracked_resources() {
        let map = ResourceMap::default();
        let res1 = service("res1");
        map.set_status(&res1, CachedStatus::default());
        assert_eq!(map.get_status(&res1), None);
    }

    #[test]
    fn test_kind_population_round_trip_is_not_a_change() {
        let map = ResourceMap::default();
        let res1 = service("res1");
        let res2 = service("res2");
        let group1 = group("group1");

        map.reconcile(group1.clone(), vec![res1.clone()], false);
        // Swapping the only member for another of the same kind keeps the
        // population non-zero.
        let changed = map.reconcile(group1, vec![res2], false);
        assert!(changed.is_empty());
    }
}

use crate::error::{Error, Result};

use resourcegroup_api::GroupKind;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use kube::api::ApiResource;
use kube::discovery::verbs;
use kube::{Client, Discovery};
use tracing::debug;

#[derive(Default)]
struct TypeIndex {
    types: HashMap<GroupKind, ApiResource>,
}

impl TypeIndex {
    fn insert(&mut self, api_resource: ApiResource) {
        let key = GroupKind {
            group: api_resource.group.clone(),
            kind: api_resource.kind.clone(),
        };
        self.types.insert(key, api_resource);
    }

    fn resolve(&self, group_kind: &GroupKind) -> Option<ApiResource> {
        self.types.get(group_kind).cloned()
    }

    fn len(&self) -> usize {
        self.types.len()
    }
}

/// Resolves a `GroupKind` to the preferred-version `ApiResource` installed on
/// the cluster. The index is rebuilt from discovery at startup and whenever
/// the watch manager runs into an unknown kind.
pub struct TypeResolver {
    client: Client,
    index: RwLock<TypeIndex>,
}

impl TypeResolver {
    pub fn new(client: Client) -> Arc<Self> {
        Arc::new(Self {
            client,
            index: RwLock::new(TypeIndex::default()),
        })
    }

    /// Rebuild the index from cluster discovery, keeping only watchable
    /// kinds at their recommended version.
    pub async fn refresh(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::KubeError("failed to run API discovery".to_string(), Box::new(e)))?;

        let mut index = TypeIndex::default();
        for group in discovery.groups() {
            for (api_resource, capabilities) in group.recommended_resources() {
                if !capabilities.supports_operation(verbs::WATCH) {
                    continue;
                }
                index.insert(api_resource);
            }
        }
        debug!(msg = "refreshed type index", kinds = index.len());
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
        Ok(())
    }

    pub fn resolve(&self, group_kind: &GroupKind) -> Option<ApiResource> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(group_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn fake_index() -> TypeIndex {
        let mut index = TypeIndex::default();
        index.insert(ApiResource::erase::<ConfigMap>(&()));
        index.insert(ApiResource::erase::<Deployment>(&()));
        index
    }

    #[test]
    fn test_resolve_unknown_kind_returns_none() {
        let index = fake_index();
        let missing = GroupKind {
            group: "not.exist".to_string(),
            kind: "UnFound".to_string(),
        };
        assert!(index.resolve(&missing).is_none());
    }

    #[test]
    fn test_resolve_core_kind() {
        let index = fake_index();
        let config_map = GroupKind {
            group: String::new(),
            kind: "ConfigMap".to_string(),
        };
        let resolved = index.resolve(&config_map).unwrap();
        assert_eq!(resolved.version, "v1");
        assert_eq!(resolved.plural, "configmaps");
    }

    #[test]
    fn test_resolve_grouped_kind() {
        let index = fake_index();
        let deployment = GroupKind {
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
        };
        let resolved = index.resolve(&deployment).unwrap();
        assert_eq!(resolved.version, "v1");
        assert_eq!(resolved.api_version, "apps/v1");
    }
}

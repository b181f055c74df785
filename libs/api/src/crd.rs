use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label on a ResourceGroup naming the inventory it represents. Compared
/// against the owning-inventory annotation of referenced objects to detect
/// ownership conflicts.
pub const INVENTORY_LABEL: &str = "cli-utils.sigs.k8s.io/inventory-id";

/// Annotation on a referenced object naming the inventory that applied it.
pub const OWNING_INVENTORY_ANNOTATION: &str = "config.k8s.io/owning-inventory";

/// Annotation on a referenced object carrying the source hash of the commit
/// it was rendered from. Truncated to seven characters in status output.
pub const SOURCE_HASH_ANNOTATION: &str = "configmanagement.gke.io/token";

/// Annotation on a ResourceGroup controlling status reporting. The only
/// recognized value is [`STATUS_MODE_DISABLED`].
pub const STATUS_MODE_ANNOTATION: &str = "configsync.gke.io/status";
pub const STATUS_MODE_DISABLED: &str = "disabled";

pub const RECONCILING_CONDITION: &str = "Reconciling";
pub const STALLED_CONDITION: &str = "Stalled";
pub const OWNERSHIP_CONDITION: &str = "Ownership";

pub const FINISH_RECONCILING: &str = "FinishReconciling";
pub const COMPONENT_FAILED: &str = "ComponentFailed";
pub const OWNERSHIP_UNMATCH: &str = "OwnershipUnmatch";
pub const OWNERSHIP_EMPTY: &str = "OwnershipEmpty";

/// The ResourceGroup custom resource declares an inventory of cluster objects
/// and receives an aggregated health summary for them in its status.
/// More info:
/// https://github.com/kubernetes/community/blob/master/contributors/devel/sig-architecture/api-conventions.md#spec-and-status
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "kpt.dev",
    version = "v1alpha1",
    kind = "ResourceGroup",
    plural = "resourcegroups",
    shortname = "rg",
    namespaced,
    status = "ResourceGroupStatus",
    printcolumn = r#"{"name":"Reconciling","type":"string","jsonPath":".status.conditions[?(@.type == 'Reconciling')].status"}"#,
    printcolumn = r#"{"name":"Stalled","type":"string","jsonPath":".status.conditions[?(@.type == 'Stalled')].status"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupSpec {
    /// References to the objects this group tracks. Order is preserved in
    /// the status output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRef>,

    /// References to other ResourceGroups whose aggregate status is
    /// reported alongside the resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subgroups: Vec<GroupRef>,
}

impl ResourceGroup {
    /// Status reporting is suppressed for this group.
    pub fn status_disabled(&self) -> bool {
        self.annotations()
            .get(STATUS_MODE_ANNOTATION)
            .is_some_and(|v| v == STATUS_MODE_DISABLED)
    }

    /// Inventory id of this group, empty if unlabeled.
    pub fn inventory_id(&self) -> String {
        self.labels().get(INVENTORY_LABEL).cloned().unwrap_or_default()
    }
}

/// A reference to a single object on the cluster. Cluster-scoped objects
/// leave the namespace empty.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn group_kind(&self) -> GroupKind {
        GroupKind {
            group: self.group.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.group, self.kind, self.namespace, self.name
        )
    }
}

/// An API group and kind, without a version. Index key for the resource map
/// and the watch manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.kind)
    }
}

/// A reference to a ResourceGroup.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub namespace: String,
    pub name: String,
}

impl From<&ResourceGroup> for GroupRef {
    fn from(resource_group: &ResourceGroup) -> Self {
        GroupRef {
            namespace: resource_group.namespace().unwrap_or_default(),
            name: resource_group.name_any(),
        }
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Standardized health of a single object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Status {
    Current,
    InProgress,
    Failed,
    Terminating,
    NotFound,
    #[default]
    Unknown,
}

/// Intent of an apply pipeline for a single object, injected by external
/// tooling and preserved verbatim by the controller.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum Actuation {
    Pending,
    Succeeded,
    Skipped,
    Failed,
}

/// Reconcile progress reported by an apply pipeline for a single object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ReconcileStatus {
    Pending,
    Succeeded,
    Skipped,
    Failed,
    Timeout,
}

/// Actuation strategy declared by an apply pipeline.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum Strategy {
    Apply,
    Delete,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A condition in the Kubernetes convention.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

/// Status of a single tracked object, one entry per spec resource.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(flatten)]
    pub resource: ResourceRef,
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actuation: Option<Actuation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Aggregate status of a subgroup, one entry per spec subgroup.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    #[serde(flatten)]
    pub group: GroupRef,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Most recent observed status of the ResourceGroup. Read-only.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_statuses: Vec<ResourceStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subgroup_statuses: Vec<GroupStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_display() {
        let resource = ResourceRef {
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
            namespace: "ns1".to_string(),
            name: "dep1".to_string(),
        };
        assert_eq!(resource.to_string(), "apps/Deployment/ns1/dep1");

        let cluster_scoped = ResourceRef {
            group: String::new(),
            kind: "Namespace".to_string(),
            namespace: String::new(),
            name: "ns1".to_string(),
        };
        assert_eq!(cluster_scoped.to_string(), "/Namespace//ns1");
    }

    #[test]
    fn test_resource_ref_serialization_skips_empty_fields() {
        let cluster_scoped = ResourceRef {
            group: String::new(),
            kind: "Namespace".to_string(),
            namespace: String::new(),
            name: "ns1".to_string(),
        };
        let json = serde_json::to_value(&cluster_scoped).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "Namespace", "name": "ns1"}));

        let parsed: ResourceRef =
            serde_json::from_value(serde_json::json!({"kind": "Namespace", "name": "ns1"}))
                .unwrap();
        assert_eq!(parsed, cluster_scoped);
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(
            serde_json::to_value(Status::InProgress).unwrap(),
            serde_json::json!("InProgress")
        );
        assert_eq!(
            serde_json::to_value(Status::NotFound).unwrap(),
            serde_json::json!("NotFound")
        );
        assert_eq!(
            serde_json::to_value(ConditionStatus::True).unwrap(),
            serde_json::json!("True")
        );
    }

    #[test]
    fn test_resource_status_flattens_resource_ref() {
        let status = ResourceStatus {
            resource: ResourceRef {
                group: "apps".to_string(),
                kind: "Deployment".to_string(),
                namespace: "ns1".to_string(),
                name: "dep1".to_string(),
            },
            status: Status::Current,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "Deployment");
        assert_eq!(json["name"], "dep1");
        assert_eq!(json["status"], "Current");
        assert!(json.get("conditions").is_none());
    }

    #[test]
    fn test_status_disabled_annotation() {
        let mut resource_group = ResourceGroup::new("group1", ResourceGroupSpec::default());
        assert!(!resource_group.status_disabled());

        resource_group.metadata.annotations = Some(
            [(STATUS_MODE_ANNOTATION.to_string(), STATUS_MODE_DISABLED.to_string())]
                .into_iter()
                .collect(),
        );
        assert!(resource_group.status_disabled());
    }
}

//! Resource types the Kubernetes connector can migrate.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::discovery::ApiResource;

/// One supported resource type.
pub struct ResourceKind {
    /// Canonical plural name used as the unit type.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub namespaced: bool,
    api_resource: fn() -> ApiResource,
}

impl ResourceKind {
    pub fn api_resource(&self) -> ApiResource {
        (self.api_resource)()
    }
}

impl std::fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceKind")
            .field("name", &self.name)
            .field("namespaced", &self.namespaced)
            .finish()
    }
}

static KINDS: &[ResourceKind] = &[
    ResourceKind {
        name: "deployments",
        aliases: &["deployment", "deploy"],
        namespaced: true,
        api_resource: || ApiResource::erase::<Deployment>(&()),
    },
    ResourceKind {
        name: "statefulsets",
        aliases: &["statefulset", "sts"],
        namespaced: true,
        api_resource: || ApiResource::erase::<StatefulSet>(&()),
    },
    ResourceKind {
        name: "daemonsets",
        aliases: &["daemonset", "ds"],
        namespaced: true,
        api_resource: || ApiResource::erase::<DaemonSet>(&()),
    },
    ResourceKind {
        name: "services",
        aliases: &["service", "svc"],
        namespaced: true,
        api_resource: || ApiResource::erase::<Service>(&()),
    },
    ResourceKind {
        name: "configmaps",
        aliases: &["configmap", "cm"],
        namespaced: true,
        api_resource: || ApiResource::erase::<ConfigMap>(&()),
    },
    ResourceKind {
        name: "secrets",
        aliases: &["secret"],
        namespaced: true,
        api_resource: || ApiResource::erase::<Secret>(&()),
    },
    ResourceKind {
        name: "persistentvolumeclaims",
        aliases: &["persistentvolumeclaim", "pvcs", "pvc"],
        namespaced: true,
        api_resource: || ApiResource::erase::<PersistentVolumeClaim>(&()),
    },
    ResourceKind {
        name: "persistentvolumes",
        aliases: &["persistentvolume", "pvs", "pv"],
        namespaced: false,
        api_resource: || ApiResource::erase::<PersistentVolume>(&()),
    },
    ResourceKind {
        name: "cronjobs",
        aliases: &["cronjob", "cj"],
        namespaced: true,
        api_resource: || ApiResource::erase::<CronJob>(&()),
    },
    ResourceKind {
        name: "jobs",
        aliases: &["job"],
        namespaced: true,
        api_resource: || ApiResource::erase::<Job>(&()),
    },
    ResourceKind {
        name: "ingresses",
        aliases: &["ingress", "ing"],
        namespaced: true,
        api_resource: || ApiResource::erase::<Ingress>(&()),
    },
];

/// Types migrated when a selector names a namespace without unit types.
pub const DEFAULT_TYPES: &[&str] = &[
    "deployments",
    "statefulsets",
    "services",
    "configmaps",
    "secrets",
    "persistentvolumeclaims",
    "persistentvolumes",
    "cronjobs",
    "jobs",
];

/// Find a kind by canonical name or alias, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static ResourceKind> {
    let name = name.trim().to_ascii_lowercase();
    KINDS
        .iter()
        .find(|k| k.name == name || k.aliases.contains(&name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_alias() {
        assert_eq!(lookup("pvcs").map(|k| k.name), Some("persistentvolumeclaims"));
        assert_eq!(lookup("Deploy").map(|k| k.name), Some("deployments"));
        assert!(lookup("widgets").is_none());
    }

    #[test]
    fn test_defaults_are_supported() {
        for name in DEFAULT_TYPES {
            assert!(lookup(name).is_some(), "{} missing", name);
        }
    }

    #[test]
    fn test_api_resource_metadata() {
        let ar = lookup("cronjobs").unwrap().api_resource();
        assert_eq!(ar.api_version, "batch/v1");
        assert_eq!(ar.kind, "CronJob");
        assert_eq!(ar.plural, "cronjobs");
        assert!(!lookup("pv").unwrap().namespaced);
    }
}

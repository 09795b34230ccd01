//! Strip server-populated fields so a manifest can be re-created elsewhere.

use serde_json::Value;

const METADATA_FIELDS: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "selfLink",
    "managedFields",
    "ownerReferences",
];

const DROPPED_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
    "pv.kubernetes.io/bind-completed",
    "pv.kubernetes.io/bound-by-controller",
];

const SERVICE_SPEC_FIELDS: &[&str] = &[
    "clusterIP",
    "clusterIPs",
    "externalIPs",
    "healthCheckNodePort",
    "loadBalancerIP",
    "loadBalancerSourceRanges",
];

const JOB_GENERATED_LABELS: &[&str] = &[
    "controller-uid",
    "batch.kubernetes.io/controller-uid",
];

fn remove_keys(value: &mut Value, keys: &[&str]) {
    if let Some(map) = value.as_object_mut() {
        for key in keys {
            map.remove(*key);
        }
    }
}

fn drop_empty(value: &mut Value, key: &str) {
    if let Some(map) = value.as_object_mut() {
        if map.get(key).and_then(Value::as_object).is_some_and(|m| m.is_empty()) {
            map.remove(key);
        }
    }
}

/// Clean `manifest` of type `unit_type` (canonical plural name) in place.
pub fn sanitize_manifest(unit_type: &str, manifest: &mut Value) {
    if let Some(map) = manifest.as_object_mut() {
        map.remove("status");
    }

    if let Some(metadata) = manifest.get_mut("metadata") {
        remove_keys(metadata, METADATA_FIELDS);
        if let Some(annotations) = metadata.get_mut("annotations") {
            remove_keys(annotations, DROPPED_ANNOTATIONS);
        }
        drop_empty(metadata, "annotations");
    }

    match unit_type {
        "services" => {
            if let Some(spec) = manifest.get_mut("spec") {
                remove_keys(spec, SERVICE_SPEC_FIELDS);
                if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
                    for port in ports {
                        remove_keys(port, &["nodePort"]);
                    }
                }
            }
        }
        "jobs" => {
            if let Some(spec) = manifest.get_mut("spec") {
                remove_keys(spec, &["selector"]);
            }
            for pointer in ["/metadata/labels", "/spec/template/metadata/labels"] {
                if let Some(labels) = manifest.pointer_mut(pointer) {
                    remove_keys(labels, JOB_GENERATED_LABELS);
                }
            }
        }
        "persistentvolumeclaims" => {
            if let Some(spec) = manifest.get_mut("spec") {
                remove_keys(spec, &["volumeName"]);
            }
        }
        "persistentvolumes" => {
            if let Some(claim_ref) = manifest.pointer_mut("/spec/claimRef") {
                remove_keys(claim_ref, &["uid", "resourceVersion"]);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_removes_server_metadata_and_status() {
        let mut m = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "app",
                "namespace": "prod",
                "uid": "1234",
                "resourceVersion": "99",
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "managedFields": [],
                "annotations": {
                    "kubectl.kubernetes.io/last-applied-configuration": "{}"
                },
                "labels": {"app": "web"}
            },
            "data": {"key": "value"},
            "status": {}
        });
        sanitize_manifest("configmaps", &mut m);
        assert_eq!(
            m,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "app", "namespace": "prod", "labels": {"app": "web"}},
                "data": {"key": "value"}
            })
        );
    }

    #[test]
    fn test_service_allocations_removed() {
        let mut m = json!({
            "kind": "Service",
            "metadata": {"name": "web"},
            "spec": {
                "type": "NodePort",
                "clusterIP": "10.0.0.1",
                "clusterIPs": ["10.0.0.1"],
                "ports": [{"port": 80, "nodePort": 30080}],
                "selector": {"app": "web"}
            }
        });
        sanitize_manifest("services", &mut m);
        assert_eq!(
            m["spec"],
            json!({"type": "NodePort", "ports": [{"port": 80}], "selector": {"app": "web"}})
        );
    }

    #[test]
    fn test_job_selector_and_controller_labels_removed() {
        let mut m = json!({
            "kind": "Job",
            "metadata": {"name": "migrate", "labels": {"controller-uid": "x", "team": "db"}},
            "spec": {
                "selector": {"matchLabels": {"controller-uid": "x"}},
                "template": {"metadata": {"labels": {
                    "batch.kubernetes.io/controller-uid": "x",
                    "job-name": "migrate"
                }}}
            }
        });
        sanitize_manifest("jobs", &mut m);
        assert!(m["spec"].get("selector").is_none());
        assert_eq!(m["metadata"]["labels"], json!({"team": "db"}));
        assert_eq!(
            m["spec"]["template"]["metadata"]["labels"],
            json!({"job-name": "migrate"})
        );
    }

    #[test]
    fn test_pvc_binding_removed() {
        let mut m = json!({"metadata": {"name": "data"}, "spec": {"volumeName": "pv-1", "resources": {}}});
        sanitize_manifest("persistentvolumeclaims", &mut m);
        assert_eq!(m["spec"], json!({"resources": {}}));
    }
}

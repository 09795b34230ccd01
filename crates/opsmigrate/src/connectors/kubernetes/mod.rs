//! Kubernetes connector.
//!
//! Collections are namespaces; units are objects of the types listed in
//! [`resources`]. Objects are fetched as dynamic JSON, stripped of
//! server-populated fields, and written with server-side apply so that
//! re-applying the same manifest is a no-op.

pub mod resources;
mod sanitize;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::{ConnectionConfig, KubernetesConfig, SystemKind};
use crate::core::{Connection, Connector, Definition, MigrationUnit, UnitCount, WriteOptions};
use crate::error::{MigrateError, Result};

pub use resources::{ResourceKind, DEFAULT_TYPES};
pub use sanitize::sanitize_manifest;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a replaced object may take to disappear.
const DELETE_WAIT: Duration = Duration::from_secs(30);

const FIELD_MANAGER: &str = "opsmigrate";

/// Opens [`KubernetesConnection`]s.
#[derive(Debug, Default)]
pub struct KubernetesConnector;

impl KubernetesConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for KubernetesConnector {
    fn kind(&self) -> SystemKind {
        SystemKind::Kubernetes
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        match config {
            ConnectionConfig::Kubernetes(cfg) => {
                Ok(Box::new(KubernetesConnection::open(cfg).await?))
            }
            other => Err(MigrateError::Config(format!(
                "kubernetes connector cannot open a {} connection",
                other.kind()
            ))),
        }
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == code)
}

/// The request never got an answer from the API server.
fn is_link_error(err: &kube::Error) -> bool {
    matches!(err, kube::Error::HyperError(_) | kube::Error::Service(_))
}

/// A client bound to one cluster.
pub struct KubernetesConnection {
    client: Client,
    label: String,
}

impl std::fmt::Debug for KubernetesConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesConnection")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl KubernetesConnection {
    /// Build a client from the inline kubeconfig and check the API server answers.
    #[instrument(skip_all, fields(context = ?config.context))]
    pub async fn open(config: &KubernetesConfig) -> Result<Self> {
        let system = match &config.context {
            Some(ctx) => format!("kubernetes (context:{})", ctx),
            None => "kubernetes".to_string(),
        };

        let kubeconfig = Kubeconfig::from_yaml(&config.kubeconfig)
            .map_err(|e| MigrateError::connection(&system, e))?;
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..Default::default()
        };
        let mut kube_config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| MigrateError::connection(&system, e))?;
        kube_config.read_timeout = Some(DEFAULT_API_TIMEOUT);

        let label = format!("{} {}", system, kube_config.cluster_url);
        let client =
            Client::try_from(kube_config).map_err(|e| MigrateError::connection(&label, e))?;
        let version = client
            .apiserver_version()
            .await
            .map_err(|e| MigrateError::connection(&label, e))?;

        info!("Connected to {} (server {})", label, version.git_version);
        Ok(Self { client, label })
    }

    /// Map a failed call on a unit, keeping transport failures as connection errors.
    fn unit_error(
        &self,
        err: kube::Error,
        otherwise: impl FnOnce(kube::Error) -> MigrateError,
    ) -> MigrateError {
        if is_link_error(&err) {
            MigrateError::connection(&self.label, err)
        } else {
            otherwise(err)
        }
    }

    fn kind_for(unit_type: &str) -> Option<&'static ResourceKind> {
        resources::lookup(unit_type)
    }

    fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }

    fn unit_api(&self, kind: &ResourceKind, unit: &MigrationUnit) -> (ApiResource, Api<DynamicObject>) {
        let ar = kind.api_resource();
        let ns = kind.namespaced.then_some(unit.collection.as_str());
        let api = self.dynamic_api(&ar, ns);
        (ar, api)
    }

    async fn namespace_exists(&self, namespace: &str) -> std::result::Result<bool, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(namespace).await?.is_some())
    }

    async fn ensure_namespace(&self, namespace: &str) -> std::result::Result<(), kube::Error> {
        if self.namespace_exists(namespace).await? {
            return Ok(());
        }
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!("Created namespace {}", namespace);
                Ok(())
            }
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete an object and wait until the API server forgets it.
    async fn delete_and_wait(&self, api: &Api<DynamicObject>, name: &str) -> std::result::Result<(), kube::Error> {
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if is_status(&e, 404) => return Ok(()),
            Err(e) => return Err(e),
        }
        let deadline = tokio::time::Instant::now() + DELETE_WAIT;
        while tokio::time::Instant::now() < deadline {
            if api.get_opt(name).await?.is_none() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        debug!("{} still terminating after {:?}", name, DELETE_WAIT);
        Ok(())
    }

    /// Does a persistent volume belong to `namespace` through its claim?
    fn claimed_in(obj: &DynamicObject, namespace: &str) -> bool {
        obj.data
            .pointer("/spec/claimRef/namespace")
            .and_then(Value::as_str)
            == Some(namespace)
    }
}

#[async_trait]
impl Connection for KubernetesConnection {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn default_unit_type(&self) -> &str {
        "deployments"
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| MigrateError::connection(&self.label, e))
    }

    #[instrument(skip(self), fields(system = %self.label))]
    async fn list_collections(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| MigrateError::discovery("*", e))?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    /// Lists type by type in the requested order. Persistent volumes are
    /// cluster scoped and are attributed to the namespace of their claim.
    #[instrument(skip(self), fields(system = %self.label))]
    async fn list_units(
        &self,
        collection: &str,
        unit_types: &[String],
    ) -> Result<Vec<MigrationUnit>> {
        let mut kinds = Vec::new();
        for unit_type in unit_types {
            let kind = Self::kind_for(unit_type).ok_or_else(|| {
                MigrateError::discovery(
                    collection,
                    format!("unsupported resource type '{}'", unit_type),
                )
            })?;
            if !kinds.iter().any(|k: &&ResourceKind| k.name == kind.name) {
                kinds.push(kind);
            }
        }
        if unit_types.is_empty() {
            kinds.extend(DEFAULT_TYPES.iter().filter_map(|t| Self::kind_for(t)));
        }

        if !self
            .namespace_exists(collection)
            .await
            .map_err(|e| MigrateError::discovery(collection, e))?
        {
            return Err(MigrateError::discovery(collection, "namespace does not exist"));
        }

        let mut units = Vec::new();
        for kind in kinds {
            let ar = kind.api_resource();
            let ns = kind.namespaced.then_some(collection);
            let list = self
                .dynamic_api(&ar, ns)
                .list(&ListParams::default())
                .await
                .map_err(|e| MigrateError::discovery(collection, format!("{}: {}", kind.name, e)))?;
            units.extend(
                list.items
                    .iter()
                    .filter(|obj| kind.namespaced || Self::claimed_in(obj, collection))
                    .filter_map(|obj| obj.metadata.name.as_deref())
                    .map(|name| MigrationUnit::new(collection, kind.name, name)),
            );
        }
        debug!("{} units in namespace {}", units.len(), collection);
        Ok(units)
    }

    #[instrument(skip(self), fields(unit = %unit))]
    async fn fetch_definition(&self, unit: &MigrationUnit) -> Result<Definition> {
        let kind = Self::kind_for(&unit.unit_type).ok_or_else(|| {
            MigrateError::discovery(
                &unit.collection,
                format!("unsupported resource type '{}'", unit.unit_type),
            )
        })?;
        let (ar, api) = self.unit_api(kind, unit);

        let obj = api
            .get_opt(&unit.name)
            .await
            .map_err(|e| self.unit_error(e, |e| MigrateError::discovery(&unit.collection, e)))?
            .ok_or_else(|| MigrateError::NotFound(unit.to_string()))?;

        let mut manifest = serde_json::to_value(&obj)?;
        if let Some(map) = manifest.as_object_mut() {
            map.insert("apiVersion".to_string(), Value::String(ar.api_version.clone()));
            map.insert("kind".to_string(), Value::String(ar.kind.clone()));
        }
        sanitize_manifest(kind.name, &mut manifest);
        Ok(Definition::Manifest { manifest })
    }

    #[instrument(skip(self, definition), fields(unit = %unit))]
    async fn write_definition(
        &self,
        unit: &MigrationUnit,
        definition: &Definition,
        options: &WriteOptions,
    ) -> Result<()> {
        let kind = Self::kind_for(&unit.unit_type).ok_or_else(|| {
            MigrateError::write(unit, format!("unsupported resource type '{}'", unit.unit_type))
        })?;
        let Definition::Manifest { manifest } = definition else {
            return Err(MigrateError::write(unit, "kubernetes can only store manifests"));
        };

        if options.create_schema {
            self.ensure_namespace(&unit.collection)
                .await
                .map_err(|e| {
                    self.unit_error(e, |e| {
                        MigrateError::write(unit, format!("ensuring namespace: {}", e))
                    })
                })?;
        }

        let mut manifest = manifest.clone();
        if let Some(metadata) = manifest.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("name".to_string(), Value::String(unit.name.clone()));
            if kind.namespaced {
                metadata.insert(
                    "namespace".to_string(),
                    Value::String(unit.collection.clone()),
                );
            } else {
                metadata.remove("namespace");
            }
        }
        if let Some(claim_ns) = manifest.pointer_mut("/spec/claimRef/namespace") {
            *claim_ns = Value::String(unit.collection.clone());
        }

        let (_, api) = self.unit_api(kind, unit);

        if options.truncate_target {
            self.delete_and_wait(&api, &unit.name)
                .await
                .map_err(|e| {
                    self.unit_error(e, |e| MigrateError::write(unit, format!("replacing: {}", e)))
                })?;
        }

        let patch_params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            force: true,
            ..Default::default()
        };
        api.patch(&unit.name, &patch_params, &Patch::Apply(&manifest))
            .await
            .map_err(|e| self.unit_error(e, |e| MigrateError::write(unit, e)))?;

        debug!("Applied {}", unit);
        Ok(())
    }

    async fn count_units(&self, unit: &MigrationUnit) -> Result<UnitCount> {
        let Some(kind) = Self::kind_for(&unit.unit_type) else {
            return Err(MigrateError::discovery(
                &unit.collection,
                format!("unsupported resource type '{}'", unit.unit_type),
            ));
        };
        let (_, api) = self.unit_api(kind, unit);
        let found = api
            .get_opt(&unit.name)
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;
        Ok(match found {
            Some(_) => UnitCount::present(1),
            None => UnitCount::absent(),
        })
    }
}

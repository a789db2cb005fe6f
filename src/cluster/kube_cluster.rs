//! Live cluster adapter backed by `kube::Client`

use crate::domain::ports::{ClusterApi, ExecOutput};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Event, Namespace, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{
    Api, AttachParams, AttachedProcess, DeleteParams, ListParams, LogParams, ObjectMeta, Patch,
    PatchParams, PostParams,
};
use kube::Client;
use serde_json::json;
use tracing::debug;

/// `ClusterApi` over a real API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Treat a not-found response as success
fn ignore_not_found<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

async fn read_stream<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    tokio_util::io::ReaderStream::new(reader)
        .filter_map(|chunk| async move { chunk.ok().and_then(|b| String::from_utf8(b.to_vec()).ok()) })
        .collect::<Vec<_>>()
        .await
        .join("")
}

/// Drain both streams at once so a full stderr pipe cannot stall stdout
async fn read_both<O, E>(stdout: Option<O>, stderr: Option<E>) -> (String, String)
where
    O: tokio::io::AsyncRead + Unpin,
    E: tokio::io::AsyncRead + Unpin,
{
    tokio::join!(read_stream(stdout), read_stream(stderr))
}

async fn collect_output(mut attached: AttachedProcess) -> Result<ExecOutput> {
    let status = attached.take_status();
    let (stdout, stderr) = read_both(attached.stdout(), attached.stderr()).await;
    let status = match status {
        Some(status) => status.await,
        None => None,
    };
    attached
        .join()
        .await
        .map_err(|e| Error::AssertionFailed(format!("exec session failed: {}", e)))?;

    let success = status
        .map(|s| s.status.as_deref() == Some("Success"))
        .unwrap_or(false);
    Ok(ExecOutput {
        stdout,
        stderr,
        success,
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_namespace(&self, generate_name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                generate_name: Some(generate_name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        Ok(api.create(&PostParams::default(), &ns).await?)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::background()).await)
    }

    async fn create_storage_class(&self, storage_class: &StorageClass) -> Result<StorageClass> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), storage_class).await?)
    }

    async fn delete_storage_class(&self, name: &str) -> Result<()> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn create_persistent_volume(&self, pv: &PersistentVolume) -> Result<PersistentVolume> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), pv).await?)
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn delete_persistent_volume(&self, name: &str) -> Result<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        Ok(self.claims(namespace).create(&PostParams::default(), pvc).await?)
    }

    async fn get_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claims(namespace).get_opt(name).await?)
    }

    async fn resize_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<PersistentVolumeClaim> {
        let patch = json!({
            "spec": { "resources": { "requests": { "storage": size } } }
        });
        Ok(self
            .claims(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete_persistent_volume_claim(&self, namespace: &str, name: &str) -> Result<()> {
        ignore_not_found(self.claims(namespace).delete(name, &DeleteParams::default()).await)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        Ok(self.pods(namespace).create(&PostParams::default(), pod).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        ignore_not_found(self.pods(namespace).delete(name, &DeleteParams::default()).await)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String> {
        Ok(self.pods(namespace).logs(name, &LogParams::default()).await?)
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<ExecOutput> {
        debug!("exec in {}/{}: {:?}", namespace, pod, command);
        let attached = self
            .pods(namespace)
            .exec(
                pod,
                command.to_vec(),
                &AttachParams::default().stdout(true).stderr(true),
            )
            .await?;
        collect_output(attached).await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), deployment).await?)
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::foreground()).await)
    }

    async fn list_events(&self, namespace: &str, involved_object: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("involvedObject.name={}", involved_object);
        let events = api.list(&ListParams::default().fields(&selector)).await?;
        Ok(events.items)
    }
}

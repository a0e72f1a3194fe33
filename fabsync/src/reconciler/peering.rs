//! Service route peering lifecycle: configuration, fabric attachment,
//! deployment.

use std::time::Duration;

use async_trait::async_trait;
use fabsync_client::ApiClient;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Reconciler, StatusProbe, await_probe, step_error};
use crate::error::{Error, Result};
use crate::model::{DeployReport, PeeringConfig, split_import_id};
use crate::paths;
use crate::reconcile::{Backoff, ConvergenceStatus, Outcome};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DETACH_TIMEOUT: Duration = Duration::from_secs(300);

/// Convergence probe over the peering resource itself.
pub struct PeeringProbe {
    fabric: String,
    node: String,
    attached_fabric: String,
    name: String,
    /// "NA" is terminal only when detaching; it never counts as deployed.
    detaching: bool,
}

impl PeeringProbe {
    pub fn new(fabric: &str, node: &str, attached_fabric: &str, name: &str) -> Self {
        Self {
            fabric: fabric.to_string(),
            node: node.to_string(),
            attached_fabric: attached_fabric.to_string(),
            name: name.to_string(),
            detaching: false,
        }
    }

    pub fn detaching(fabric: &str, node: &str, attached_fabric: &str, name: &str) -> Self {
        Self {
            detaching: true,
            ..Self::new(fabric, node, attached_fabric, name)
        }
    }
}

#[async_trait]
impl StatusProbe for PeeringProbe {
    async fn probe(&self, client: &dyn ApiClient) -> Result<ConvergenceStatus> {
        let doc = client
            .get(&paths::peering(
                &self.fabric,
                &self.node,
                &self.attached_fabric,
                &self.name,
            ))
            .await?;
        Ok(collapse(&doc, self.detaching))
    }
}

fn collapse(doc: &Value, detaching: bool) -> ConvergenceStatus {
    match doc.get("status").and_then(Value::as_str) {
        Some("Success") | Some("In-Sync") if !detaching => ConvergenceStatus::Converged,
        Some("NA") | Some("N/A") if detaching => ConvergenceStatus::Converged,
        Some("Failed") => ConvergenceStatus::Diverged,
        Some(_) => ConvergenceStatus::Pending,
        // Status not reported yet; the controller lags object creation.
        None => ConvergenceStatus::Pending,
    }
}

/// Route peering lifecycle manager.
pub struct PeeringReconciler {
    fabric: String,
}

impl PeeringReconciler {
    pub fn new(fabric: impl Into<String>) -> Self {
        Self {
            fabric: fabric.into(),
        }
    }

    async fn fetch(&self, client: &dyn ApiClient, spec: &PeeringConfig) -> Result<Option<Value>> {
        let path = paths::peering(&self.fabric, &spec.service_node, &spec.attached_fabric, &spec.name);
        match client.get(&path).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn attach(&self, client: &dyn ApiClient, spec: &PeeringConfig) -> Result<()> {
        let path = paths::peering_attachments(
            &self.fabric,
            &spec.service_node,
            &spec.attached_fabric,
            &spec.name,
        );
        let payload = json!({ "peeringNames": spec.name });
        client
            .save(&path, &payload)
            .await
            .map_err(step_error("attach", &format!("peering {}", spec.name)))?;
        Ok(())
    }

    async fn trigger_deploy(
        &self,
        client: &dyn ApiClient,
        node: &str,
        attached_fabric: &str,
        name: &str,
    ) -> Result<()> {
        let path = paths::peering_deployments(&self.fabric, node, attached_fabric, name);
        let payload = json!({ "peeringNames": name });
        client
            .save(&path, &payload)
            .await
            .map_err(step_error("deploy-trigger", &format!("peering {name}")))?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PeeringReconciler {
    type Spec = PeeringConfig;

    async fn reconcile(&self, client: &dyn ApiClient, spec: &PeeringConfig) -> Result<DeployReport> {
        let key = spec.import_key(&self.fabric);
        info!(peering = %key, deploy = spec.deploy, "Reconciling route peering");

        let payload = spec.to_wire(&self.fabric);
        let path = paths::peering(&self.fabric, &spec.service_node, &spec.attached_fabric, &spec.name);
        match self.fetch(client, spec).await? {
            Some(_) => {
                client
                    .update(&path, &payload)
                    .await
                    .map_err(step_error("update", &format!("peering {}", spec.name)))?;
            }
            None => {
                let collection =
                    paths::peerings(&self.fabric, &spec.service_node, &spec.attached_fabric);
                client
                    .save(&collection, &payload)
                    .await
                    .map_err(step_error("create", &format!("peering {}", spec.name)))?;
            }
        }

        if !spec.deploy {
            return Ok(DeployReport::configured(&key, None));
        }

        self.attach(client, spec).await?;
        self.trigger_deploy(client, &spec.service_node, &spec.attached_fabric, &spec.name)
            .await?;

        let probe = PeeringProbe::new(
            &self.fabric,
            &spec.service_node,
            &spec.attached_fabric,
            &spec.name,
        );
        let outcome = await_probe(
            client,
            &probe,
            &format!("peering {}", spec.name),
            Duration::from_secs(spec.deploy_timeout),
            POLL_INTERVAL,
            Backoff::Fixed,
        )
        .await?;
        match outcome {
            Outcome::Converged => {
                info!(peering = %key, "Route peering deployed");
                Ok(DeployReport::deployed(&key))
            }
            Outcome::TimedOut => {
                warn!(peering = %key, "Route peering deployment timed out");
                Ok(DeployReport::configured(
                    &key,
                    Some(format!(
                        "deployment timeout occurred for peering {}",
                        spec.name
                    )),
                ))
            }
        }
    }

    /// Detach, redeploy, wait for the NA terminal state, then delete. The
    /// key is the import tuple `fabric:node:attached_fabric:name`.
    async fn finalize(&self, client: &dyn ApiClient, key: &str) -> Result<DeployReport> {
        let parts = split_import_id(key);
        let [fabric, node, attached_fabric, name] = parts.as_slice() else {
            return Err(Error::Validation(format!(
                "peering key '{key}' is not fabric:node:attached_fabric:name"
            )));
        };
        if *fabric != self.fabric {
            return Err(Error::Validation(format!(
                "peering key '{key}' does not belong to fabric {}",
                self.fabric
            )));
        }
        info!(peering = %key, "Removing route peering");

        let detach_path = paths::peering_detachments(fabric, node, attached_fabric, name);
        let payload = json!({ "peeringNames": name });
        client
            .save(&detach_path, &payload)
            .await
            .map_err(step_error("detach", &format!("peering {name}")))?;
        self.trigger_deploy(client, node, attached_fabric, name)
            .await?;

        let probe = PeeringProbe::detaching(fabric, node, attached_fabric, name);
        let outcome = await_probe(
            client,
            &probe,
            &format!("peering {name}"),
            DETACH_TIMEOUT,
            POLL_INTERVAL,
            Backoff::Fixed,
        )
        .await?;
        if outcome == Outcome::TimedOut {
            return Err(Error::DeployTimeout {
                resource: format!("peering {name}"),
            });
        }

        client
            .delete(&paths::peering(fabric, node, attached_fabric, name))
            .await
            .map_err(step_error("delete", &format!("peering {name}")))?;
        Ok(DeployReport::absent(key))
    }
}

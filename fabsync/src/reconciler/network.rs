//! Network lifecycle: configuration push, switch attachments, deployment.

use std::time::Duration;

use async_trait::async_trait;
use fabsync_client::ApiClient;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Reconciler, StatusProbe, await_probe, check_attach_response, step_error};
use crate::error::{Error, Result};
use crate::model::{Attachment, DeployReport, NetworkConfig, dedup_attachments};
use crate::paths;
use crate::reconcile::{Backoff, ConvergenceStatus, Outcome};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DETACH_TIMEOUT: Duration = Duration::from_secs(300);

/// Attachment terminal state while deploying. Networks report "DEPLOYED",
/// unlike the per-switch "In-Sync" the VRF enumeration uses.
const DEPLOYED_STATE: &str = "DEPLOYED";

/// Attachment terminal state once detached.
const DETACHED_STATE: &str = "NA";

/// Convergence probe over the network attachment list.
pub struct NetworkProbe {
    fabric: String,
    name: String,
    terminal: &'static str,
}

impl NetworkProbe {
    pub fn new(fabric: &str, name: &str) -> Self {
        Self {
            fabric: fabric.to_string(),
            name: name.to_string(),
            terminal: DEPLOYED_STATE,
        }
    }

    /// Probe variant for the deletion flow, where detached is the goal.
    pub fn detaching(fabric: &str, name: &str) -> Self {
        Self {
            terminal: DETACHED_STATE,
            ..Self::new(fabric, name)
        }
    }
}

#[async_trait]
impl StatusProbe for NetworkProbe {
    async fn probe(&self, client: &dyn ApiClient) -> Result<ConvergenceStatus> {
        let doc = client
            .get(&paths::network_attachment_status(&self.fabric, &self.name))
            .await?;
        Ok(collapse(&doc, self.terminal))
    }
}

/// Collapse the attachment list to a single status; an empty result set is
/// Pending because the controller lags object creation.
fn collapse(doc: &Value, terminal: &str) -> ConvergenceStatus {
    let Some(entries) = doc.as_array() else {
        return ConvergenceStatus::Unknown;
    };
    let mut seen = false;
    for entry in entries {
        let Some(list) = entry.get("lanAttachList").and_then(Value::as_array) else {
            continue;
        };
        for attach in list {
            seen = true;
            match attach.get("attachState").and_then(Value::as_str) {
                Some(state) if state == terminal => {}
                Some("FAILED") => return ConvergenceStatus::Diverged,
                Some(_) => return ConvergenceStatus::Pending,
                None => return ConvergenceStatus::Unknown,
            }
        }
    }
    if seen {
        ConvergenceStatus::Converged
    } else {
        ConvergenceStatus::Pending
    }
}

/// Switch serials whose attachment is not already detached.
fn attached_serials(doc: &Value) -> Vec<String> {
    let Some(entries) = doc.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|e| e.get("lanAttachList").and_then(Value::as_array))
        .flatten()
        .filter(|a| {
            a.get("attachState")
                .and_then(Value::as_str)
                .is_some_and(|s| s != DETACHED_STATE)
        })
        .filter_map(|a| {
            a.get("switchSerialNo")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

/// Network lifecycle manager.
pub struct NetworkReconciler {
    fabric: String,
}

impl NetworkReconciler {
    pub fn new(fabric: impl Into<String>) -> Self {
        Self {
            fabric: fabric.into(),
        }
    }

    fn validate(spec: &NetworkConfig) -> Result<()> {
        if spec.deploy && spec.attachments.is_empty() {
            return Err(Error::Validation(format!(
                "network {}: deploy requested without any attachments",
                spec.name
            )));
        }
        Ok(())
    }

    async fn fetch(&self, client: &dyn ApiClient, name: &str) -> Result<Option<Value>> {
        match client.get(&paths::network(&self.fabric, name)).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn push_attachments(
        &self,
        client: &dyn ApiClient,
        name: &str,
        attachments: &[Attachment],
    ) -> Result<()> {
        let list: Vec<Value> = dedup_attachments(attachments)
            .iter()
            .map(|a| {
                json!({
                    "fabric": self.fabric,
                    "networkName": name,
                    "serialNumber": a.serial_number,
                    "vlan": a.vlan,
                    "switchPorts": a.ports,
                    "freeformConfig": a.freeform_config,
                    "deployment": a.attach,
                })
            })
            .collect();
        let payload = json!([{ "networkName": name, "lanAttachList": list }]);
        let resource = format!("network {name}");
        let response = client
            .save(&paths::network_attachments(&self.fabric), &payload)
            .await
            .map_err(step_error("attach", &resource))?;
        check_attach_response(&response)
    }

    async fn trigger_deploy(&self, client: &dyn ApiClient, name: &str) -> Result<()> {
        let payload = json!({ "networkNames": name });
        client
            .save(&paths::network_deployments(&self.fabric), &payload)
            .await
            .map_err(step_error("deploy-trigger", &format!("network {name}")))?;
        Ok(())
    }

    async fn await_convergence(
        &self,
        client: &dyn ApiClient,
        name: &str,
        timeout: Duration,
        probe: &NetworkProbe,
    ) -> Result<Outcome> {
        await_probe(
            client,
            probe,
            &format!("network {name}"),
            timeout,
            POLL_INTERVAL,
            Backoff::Fixed,
        )
        .await
    }
}

#[async_trait]
impl Reconciler for NetworkReconciler {
    type Spec = NetworkConfig;

    async fn reconcile(&self, client: &dyn ApiClient, spec: &NetworkConfig) -> Result<DeployReport> {
        Self::validate(spec)?;
        info!(fabric = %self.fabric, network = %spec.name, deploy = spec.deploy, "Reconciling network");

        let payload = spec.to_wire(&self.fabric);
        match self.fetch(client, &spec.name).await? {
            Some(_) => {
                if !spec.deploy {
                    let probe = NetworkProbe::new(&self.fabric, &spec.name);
                    if probe.probe(client).await? == ConvergenceStatus::Converged {
                        return Err(Error::Validation(format!(
                            "network {}: already deployed, undeploy requires replacement",
                            spec.name
                        )));
                    }
                }
                client
                    .update(&paths::network(&self.fabric, &spec.name), &payload)
                    .await
                    .map_err(step_error("update", &format!("network {}", spec.name)))?;
            }
            None => {
                client
                    .save(&paths::networks(&self.fabric), &payload)
                    .await
                    .map_err(step_error("create", &format!("network {}", spec.name)))?;
            }
        }

        if !spec.deploy {
            return Ok(DeployReport::configured(&spec.name, None));
        }

        self.push_attachments(client, &spec.name, &spec.attachments)
            .await?;
        self.trigger_deploy(client, &spec.name).await?;

        let probe = NetworkProbe::new(&self.fabric, &spec.name);
        let timeout = Duration::from_secs(spec.deploy_timeout);
        match self
            .await_convergence(client, &spec.name, timeout, &probe)
            .await?
        {
            Outcome::Converged => {
                info!(fabric = %self.fabric, network = %spec.name, "Network deployed");
                Ok(DeployReport::deployed(&spec.name))
            }
            Outcome::TimedOut => {
                warn!(fabric = %self.fabric, network = %spec.name, "Network deployment timed out");
                Ok(DeployReport::configured(
                    &spec.name,
                    Some(format!(
                        "deployment timeout occurred for network {}",
                        spec.name
                    )),
                ))
            }
        }
    }

    async fn finalize(&self, client: &dyn ApiClient, name: &str) -> Result<DeployReport> {
        info!(fabric = %self.fabric, network = %name, "Removing network");

        let status = client
            .get(&paths::network_attachment_status(&self.fabric, name))
            .await?;
        let attached = attached_serials(&status);
        if !attached.is_empty() {
            let detach: Vec<Attachment> = attached
                .iter()
                .map(|serial| {
                    let mut a = Attachment::new(serial.clone());
                    a.attach = false;
                    a
                })
                .collect();
            self.push_attachments(client, name, &detach).await?;
            self.trigger_deploy(client, name).await?;

            let probe = NetworkProbe::detaching(&self.fabric, name);
            let outcome = self
                .await_convergence(client, name, DETACH_TIMEOUT, &probe)
                .await?;
            if outcome == Outcome::TimedOut {
                return Err(Error::DeployTimeout {
                    resource: format!("network {name}"),
                });
            }
        }

        client
            .delete(&paths::network(&self.fabric, name))
            .await
            .map_err(step_error("delete", &format!("network {name}")))?;
        Ok(DeployReport::absent(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_doc(states: &[(&str, &str)]) -> Value {
        let list: Vec<Value> = states
            .iter()
            .map(|(serial, state)| json!({"switchSerialNo": serial, "attachState": state}))
            .collect();
        json!([{"networkName": "web", "lanAttachList": list}])
    }

    #[test]
    fn deployed_everywhere_collapses_to_converged() {
        let doc = status_doc(&[("FDO1", "DEPLOYED"), ("FDO2", "DEPLOYED")]);
        assert_eq!(collapse(&doc, DEPLOYED_STATE), ConvergenceStatus::Converged);
    }

    #[test]
    fn out_of_sync_switch_keeps_polling() {
        let doc = status_doc(&[("FDO1", "OUT_OF_SYNC")]);
        assert_eq!(collapse(&doc, DEPLOYED_STATE), ConvergenceStatus::Pending);
    }

    #[test]
    fn missing_state_field_is_unknown() {
        let doc = json!([{"networkName": "web", "lanAttachList": [{"switchSerialNo": "FDO1"}]}]);
        assert_eq!(collapse(&doc, DEPLOYED_STATE), ConvergenceStatus::Unknown);
    }

    #[test]
    fn attached_serials_ignores_na() {
        let doc = status_doc(&[("FDO1", "DEPLOYED"), ("FDO2", "NA")]);
        assert_eq!(attached_serials(&doc), vec!["FDO1"]);
    }
}

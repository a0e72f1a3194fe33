//! VRF lifecycle: configuration push, switch attachments, deployment.

use std::time::Duration;

use async_trait::async_trait;
use fabsync_client::ApiClient;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Reconciler, StatusProbe, await_probe, check_attach_response, step_error};
use crate::error::{Error, Result};
use crate::model::{Attachment, DeployReport, VrfConfig, dedup_attachments};
use crate::paths;
use crate::reconcile::{Backoff, ConvergenceStatus, Outcome};

/// Poll cadence for resource-level deployments.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Budget for the detach poll during deletion.
const DETACH_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-switch terminal state while deploying.
const DEPLOYED_STATE: &str = "In-Sync";

/// Per-switch terminal state once detached.
const DETACHED_STATE: &str = "NA";

/// Convergence probe over the VRF attachment enumeration.
pub struct VrfProbe {
    fabric: String,
    name: String,
    terminal: &'static str,
}

impl VrfProbe {
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
impl StatusProbe for VrfProbe {
    async fn probe(&self, client: &dyn ApiClient) -> Result<ConvergenceStatus> {
        let doc = client
            .get(&paths::vrf_attachment_status(&self.fabric, &self.name))
            .await?;
        Ok(collapse(&doc, self.terminal))
    }
}

/// Collapse the attachment enumeration to a single status. An empty result
/// set is Pending, not an error: the controller lags object creation by up
/// to one poll interval.
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
            match attach.get("lanAttachState").and_then(Value::as_str) {
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

/// Switch serials whose attachment is not already in the detached state.
fn attached_serials(doc: &Value) -> Vec<String> {
    let Some(entries) = doc.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|e| e.get("lanAttachList").and_then(Value::as_array))
        .flatten()
        .filter(|a| {
            a.get("lanAttachState")
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

/// VRF lifecycle manager.
pub struct VrfReconciler {
    fabric: String,
}

impl VrfReconciler {
    pub fn new(fabric: impl Into<String>) -> Self {
        Self {
            fabric: fabric.into(),
        }
    }

    /// Deployment without attachment targets is a configuration error,
    /// rejected before any controller call.
    fn validate(spec: &VrfConfig) -> Result<()> {
        if spec.deploy && spec.attachments.is_empty() {
            return Err(Error::Validation(format!(
                "vrf {}: deploy requested without any attachments",
                spec.name
            )));
        }
        Ok(())
    }

    async fn fetch(&self, client: &dyn ApiClient, name: &str) -> Result<Option<Value>> {
        match client.get(&paths::vrf(&self.fabric, name)).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Push the batched attachment list, one call for all target switches.
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
                    "vrfName": name,
                    "serialNumber": a.serial_number,
                    "vlan": a.vlan,
                    "switchPorts": a.ports,
                    "freeformConfig": a.freeform_config,
                    "deployment": a.attach,
                })
            })
            .collect();
        let payload = json!([{ "vrfName": name, "lanAttachList": list }]);
        let resource = format!("vrf {name}");
        let response = client
            .save(&paths::vrf_attachments(&self.fabric), &payload)
            .await
            .map_err(step_error("attach", &resource))?;
        check_attach_response(&response)
    }

    async fn trigger_deploy(&self, client: &dyn ApiClient, name: &str) -> Result<()> {
        let payload = json!({ "vrfNames": name });
        client
            .save(&paths::vrf_deployments(&self.fabric), &payload)
            .await
            .map_err(step_error("deploy-trigger", &format!("vrf {name}")))?;
        Ok(())
    }

    async fn await_convergence(
        &self,
        client: &dyn ApiClient,
        name: &str,
        timeout: Duration,
        probe: &VrfProbe,
    ) -> Result<Outcome> {
        await_probe(
            client,
            probe,
            &format!("vrf {name}"),
            timeout,
            POLL_INTERVAL,
            Backoff::Fixed,
        )
        .await
    }
}

#[async_trait]
impl Reconciler for VrfReconciler {
    type Spec = VrfConfig;

    async fn reconcile(&self, client: &dyn ApiClient, spec: &VrfConfig) -> Result<DeployReport> {
        Self::validate(spec)?;
        info!(fabric = %self.fabric, vrf = %spec.name, deploy = spec.deploy, "Reconciling VRF");

        let payload = spec.to_wire(&self.fabric);
        match self.fetch(client, &spec.name).await? {
            Some(_) => {
                // An attached VRF cannot be administratively undeployed by a
                // plain update; that requires resource replacement.
                if !spec.deploy {
                    let probe = VrfProbe::new(&self.fabric, &spec.name);
                    if probe.probe(client).await? == ConvergenceStatus::Converged {
                        return Err(Error::Validation(format!(
                            "vrf {}: already deployed, undeploy requires replacement",
                            spec.name
                        )));
                    }
                }
                client
                    .update(&paths::vrf(&self.fabric, &spec.name), &payload)
                    .await
                    .map_err(step_error("update", &format!("vrf {}", spec.name)))?;
            }
            None => {
                client
                    .save(&paths::vrfs(&self.fabric), &payload)
                    .await
                    .map_err(step_error("create", &format!("vrf {}", spec.name)))?;
            }
        }

        if !spec.deploy {
            return Ok(DeployReport::configured(&spec.name, None));
        }

        self.push_attachments(client, &spec.name, &spec.attachments)
            .await?;
        // A failed trigger is fatal; polling a deploy that never started
        // would only mask the error.
        self.trigger_deploy(client, &spec.name).await?;

        let probe = VrfProbe::new(&self.fabric, &spec.name);
        let timeout = Duration::from_secs(spec.deploy_timeout);
        match self
            .await_convergence(client, &spec.name, timeout, &probe)
            .await?
        {
            Outcome::Converged => {
                info!(fabric = %self.fabric, vrf = %spec.name, "VRF deployed");
                Ok(DeployReport::deployed(&spec.name))
            }
            Outcome::TimedOut => {
                warn!(fabric = %self.fabric, vrf = %spec.name, "VRF deployment timed out");
                Ok(DeployReport::configured(
                    &spec.name,
                    Some(format!("deployment timeout occurred for vrf {}", spec.name)),
                ))
            }
        }
    }

    async fn finalize(&self, client: &dyn ApiClient, name: &str) -> Result<DeployReport> {
        info!(fabric = %self.fabric, vrf = %name, "Removing VRF");

        // Detach whatever is still bound, redeploy so the devices drop their
        // configuration, and only then delete the object.
        let status = client
            .get(&paths::vrf_attachment_status(&self.fabric, name))
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

            let probe = VrfProbe::detaching(&self.fabric, name);
            let outcome = self
                .await_convergence(client, name, DETACH_TIMEOUT, &probe)
                .await?;
            if outcome == Outcome::TimedOut {
                return Err(Error::DeployTimeout {
                    resource: format!("vrf {name}"),
                });
            }
        }

        client
            .delete(&paths::vrf(&self.fabric, name))
            .await
            .map_err(step_error("delete", &format!("vrf {name}")))?;
        Ok(DeployReport::absent(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_doc(states: &[(&str, &str)]) -> Value {
        let list: Vec<Value> = states
            .iter()
            .map(|(serial, state)| json!({"switchSerialNo": serial, "lanAttachState": state}))
            .collect();
        json!([{"vrfName": "blue", "lanAttachList": list}])
    }

    #[test]
    fn all_in_sync_collapses_to_converged() {
        let doc = status_doc(&[("FDO1", "In-Sync"), ("FDO2", "In-Sync")]);
        assert_eq!(collapse(&doc, DEPLOYED_STATE), ConvergenceStatus::Converged);
    }

    #[test]
    fn any_pending_switch_keeps_polling() {
        let doc = status_doc(&[("FDO1", "In-Sync"), ("FDO2", "PENDING")]);
        assert_eq!(collapse(&doc, DEPLOYED_STATE), ConvergenceStatus::Pending);
    }

    #[test]
    fn failed_switch_is_diverged() {
        let doc = status_doc(&[("FDO1", "FAILED")]);
        assert_eq!(collapse(&doc, DEPLOYED_STATE), ConvergenceStatus::Diverged);
    }

    #[test]
    fn empty_enumeration_is_pending_not_error() {
        assert_eq!(collapse(&json!([]), DEPLOYED_STATE), ConvergenceStatus::Pending);
    }

    #[test]
    fn detach_flow_treats_na_as_terminal() {
        let doc = status_doc(&[("FDO1", "NA")]);
        assert_eq!(collapse(&doc, DETACHED_STATE), ConvergenceStatus::Converged);
    }

    #[test]
    fn attached_serials_skips_detached_entries() {
        let doc = status_doc(&[("FDO1", "In-Sync"), ("FDO2", "NA"), ("FDO3", "PENDING")]);
        assert_eq!(attached_serials(&doc), vec!["FDO1", "FDO3"]);
    }
}

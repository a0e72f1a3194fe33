//! Interface lifecycle: configuration push and compliance-driven deployment.
//!
//! Interfaces have no attachment phase; the pipeline is a single deploy
//! trigger followed by reconciliation against the switch's compliance view.

use std::time::Duration;

use async_trait::async_trait;
use fabsync_client::ApiClient;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Reconciler, StatusProbe, await_probe, step_error};
use crate::error::Result;
use crate::model::{DeployReport, InterfaceConfig, interface_entity};
use crate::paths;
use crate::reconcile::{Backoff, ConvergenceStatus, Outcome};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Compliance state that counts as converged.
const IN_SYNC: &str = "In-Sync";

/// Convergence probe over the interface-detail collection of the owning
/// switch, matched by `serial~name` entity id.
pub struct InterfaceProbe {
    serial: String,
    name: String,
}

impl InterfaceProbe {
    pub fn new(serial: &str, name: &str) -> Self {
        Self {
            serial: serial.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl StatusProbe for InterfaceProbe {
    async fn probe(&self, client: &dyn ApiClient) -> Result<ConvergenceStatus> {
        let doc = client.get(&paths::interface_detail(&self.serial)).await?;
        Ok(collapse(&doc, &self.serial, &self.name))
    }
}

fn collapse(doc: &Value, serial: &str, name: &str) -> ConvergenceStatus {
    let Some(entries) = doc.as_array() else {
        return ConvergenceStatus::Unknown;
    };
    let entity = interface_entity(serial, name);
    for entry in entries {
        let matches = entry
            .get("entityName")
            .and_then(Value::as_str)
            .is_some_and(|e| e == entity)
            || entry
                .get("ifName")
                .and_then(Value::as_str)
                .is_some_and(|n| n == name);
        if !matches {
            continue;
        }
        return match entry.get("complianceStatus").and_then(Value::as_str) {
            Some(IN_SYNC) => ConvergenceStatus::Converged,
            Some("Out-of-Sync") => ConvergenceStatus::Pending,
            Some(_) => ConvergenceStatus::Unknown,
            None => ConvergenceStatus::Unknown,
        };
    }
    // Not visible yet; the controller lags interface creation.
    ConvergenceStatus::Pending
}

/// Interface lifecycle manager.
pub struct InterfaceReconciler {
    fabric: String,
}

impl InterfaceReconciler {
    pub fn new(fabric: impl Into<String>) -> Self {
        Self {
            fabric: fabric.into(),
        }
    }

    async fn fetch(&self, client: &dyn ApiClient, serial: &str, name: &str) -> Result<Option<Value>> {
        match client.get(&paths::interface(serial, name)).await {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn trigger_deploy(&self, client: &dyn ApiClient, serial: &str, name: &str) -> Result<()> {
        let payload = json!([{ "serialNumber": serial, "ifName": name }]);
        client
            .save(&paths::interface_deploy(), &payload)
            .await
            .map_err(step_error(
                "deploy-trigger",
                &interface_entity(serial, name),
            ))?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for InterfaceReconciler {
    type Spec = InterfaceConfig;

    async fn reconcile(&self, client: &dyn ApiClient, spec: &InterfaceConfig) -> Result<DeployReport> {
        let entity = spec.entity_id();
        info!(fabric = %self.fabric, interface = %entity, deploy = spec.deploy, "Reconciling interface");

        let payload = spec.to_wire(&self.fabric);
        match self.fetch(client, &spec.serial_number, &spec.name).await? {
            Some(_) => {
                client
                    .update(&paths::interfaces(), &payload)
                    .await
                    .map_err(step_error("update", &entity))?;
            }
            None => {
                client
                    .save(&paths::interfaces(), &payload)
                    .await
                    .map_err(step_error("create", &entity))?;
            }
        }

        if !spec.deploy {
            return Ok(DeployReport::configured(&entity, None));
        }

        self.trigger_deploy(client, &spec.serial_number, &spec.name)
            .await?;

        let probe = InterfaceProbe::new(&spec.serial_number, &spec.name);
        let outcome = await_probe(
            client,
            &probe,
            &entity,
            Duration::from_secs(spec.deploy_timeout),
            POLL_INTERVAL,
            Backoff::Fixed,
        )
        .await?;
        match outcome {
            Outcome::Converged => {
                info!(interface = %entity, "Interface in sync");
                Ok(DeployReport::deployed(&entity))
            }
            Outcome::TimedOut => {
                warn!(interface = %entity, "Interface deployment timed out");
                Ok(DeployReport::configured(
                    &entity,
                    Some(format!("deployment timeout occurred for interface {entity}")),
                ))
            }
        }
    }

    /// Delete the interface and trigger a deploy so the removal reaches the
    /// device. The key is the `serial~name` entity id.
    async fn finalize(&self, client: &dyn ApiClient, key: &str) -> Result<DeployReport> {
        let (serial, name) = key
            .split_once(crate::model::ENTITY_SEP)
            .ok_or_else(|| {
                crate::error::Error::Validation(format!(
                    "interface key '{key}' is not serial~name"
                ))
            })?;
        info!(fabric = %self.fabric, interface = %key, "Removing interface");

        client
            .delete(&paths::interface(serial, name))
            .await
            .map_err(step_error("delete", key))?;
        self.trigger_deploy(client, serial, name).await?;
        Ok(DeployReport::absent(key))
    }
}

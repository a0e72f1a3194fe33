//! Switch onboarding and fabric convergence.
//!
//! Onboarding is the longest pipeline: reachability gate, inventory
//! discovery, migration-mode wait, then the four-stage fabric convergence
//! sequence. A fatal failure after discovery removes the partially onboarded
//! switch again; half-onboarded inventory is worse than none.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fabsync_client::ApiClient;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Reconciler, StatusProbe, step_error};
use crate::error::{Error, Result};
use crate::model::{DeployReport, SwitchConfig};
use crate::paths;
use crate::reconcile::{Backoff, ConvergenceStatus, Outcome, reconcile};

/// Short fixed cadence while waiting for migration mode to clear; role and
/// config actions are invalid during migration.
const MIGRATION_POLL: Duration = Duration::from_secs(10);

const IN_SYNC: &str = "In-Sync";
const OUT_OF_SYNC: &str = "Out-of-Sync";

/// What the reachability test said about one candidate switch.
#[derive(Debug, Clone)]
struct ReachabilityInfo {
    serial_number: String,
    sys_name: String,
    reachable: bool,
    selectable: bool,
    auth: bool,
}

fn parse_reachability(doc: &Value) -> Option<ReachabilityInfo> {
    let entry = doc.as_array()?.first()?;
    Some(ReachabilityInfo {
        serial_number: entry.get("serialNumber")?.as_str()?.to_string(),
        sys_name: entry
            .get("sysName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        reachable: entry.get("reachable").and_then(Value::as_bool).unwrap_or(false),
        selectable: entry.get("selectable").and_then(Value::as_bool).unwrap_or(false),
        auth: entry.get("auth").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Fetch the fabric config-preview entry for one switch, if present.
async fn preview_status(
    client: &dyn ApiClient,
    fabric: &str,
    serial: &str,
) -> Result<Option<String>> {
    let doc = client.get(&paths::config_preview(fabric)).await?;
    let Some(entries) = doc.as_array() else {
        return Ok(None);
    };
    Ok(entries
        .iter()
        .find(|e| e.get("switchId").and_then(Value::as_str) == Some(serial))
        .and_then(|e| e.get("status").and_then(Value::as_str))
        .map(str::to_string))
}

fn collapse_preview(status: Option<&str>) -> ConvergenceStatus {
    match status {
        Some(IN_SYNC) => ConvergenceStatus::Converged,
        Some(OUT_OF_SYNC) => ConvergenceStatus::Pending,
        // Absent from the preview list: the controller has not seen the
        // switch yet, keep polling.
        None => ConvergenceStatus::Pending,
        Some(_) => ConvergenceStatus::Unknown,
    }
}

/// Convergence probe over the fabric config-preview list.
pub struct SwitchProbe {
    fabric: String,
    serial: String,
}

impl SwitchProbe {
    pub fn new(fabric: &str, serial: &str) -> Self {
        Self {
            fabric: fabric.to_string(),
            serial: serial.to_string(),
        }
    }
}

#[async_trait]
impl StatusProbe for SwitchProbe {
    async fn probe(&self, client: &dyn ApiClient) -> Result<ConvergenceStatus> {
        let status = preview_status(client, &self.fabric, &self.serial).await?;
        Ok(collapse_preview(status.as_deref()))
    }
}

/// Switch lifecycle manager.
pub struct SwitchReconciler {
    fabric: String,
}

impl SwitchReconciler {
    pub fn new(fabric: impl Into<String>) -> Self {
        Self {
            fabric: fabric.into(),
        }
    }

    /// Step 1: the controller tests reachability and credentials before we
    /// touch the inventory.
    async fn test_reachability(
        &self,
        client: &dyn ApiClient,
        spec: &SwitchConfig,
    ) -> Result<ReachabilityInfo> {
        let payload = json!({
            "seedIP": spec.ip_address,
            "username": spec.username,
            "password": spec.password,
            "maxHops": spec.max_hops,
            "preserveConfig": spec.preserve_config,
        });
        let doc = client
            .save(&paths::test_reachability(&self.fabric), &payload)
            .await
            .map_err(step_error("test-reachability", &spec.ip_address))?;

        let Some(info) = parse_reachability(&doc) else {
            return Err(Error::Unreachable {
                target: spec.ip_address.clone(),
                reason: "no candidate returned by reachability test".to_string(),
            });
        };
        if !info.reachable || !info.selectable || !info.auth {
            return Err(Error::Unreachable {
                target: spec.ip_address.clone(),
                reason: format!(
                    "reachable={}, selectable={}, auth={}",
                    info.reachable, info.selectable, info.auth
                ),
            });
        }
        Ok(info)
    }

    async fn inventory_entry(
        &self,
        client: &dyn ApiClient,
        serial: &str,
    ) -> Result<Option<Value>> {
        let doc = client.get(&paths::inventory(&self.fabric)).await?;
        Ok(doc.as_array().and_then(|entries| {
            entries
                .iter()
                .find(|e| e.get("serialNumber").and_then(Value::as_str) == Some(serial))
                .cloned()
        }))
    }

    /// Step 2: add the switch to the fabric inventory.
    async fn discover(
        &self,
        client: &dyn ApiClient,
        spec: &SwitchConfig,
        info: &ReachabilityInfo,
    ) -> Result<()> {
        let payload = json!({
            "fabric": self.fabric,
            "seedIP": spec.ip_address,
            "username": spec.username,
            "password": spec.password,
            "maxHops": spec.max_hops,
            "preserveConfig": spec.preserve_config,
            "switches": [{
                "serialNumber": info.serial_number,
                "sysName": info.sys_name,
                "ipaddr": spec.ip_address,
            }],
        });
        client
            .save(&paths::discover(&self.fabric), &payload)
            .await
            .map_err(step_error("discover", &info.serial_number))?;
        Ok(())
    }

    /// Step 3: wait for the switch to leave the transient "Migration" mode.
    async fn wait_for_migration(
        &self,
        client: &dyn ApiClient,
        serial: &str,
        timeout: Duration,
    ) -> Result<()> {
        let outcome = reconcile(
            &format!("switch {serial} migration"),
            timeout,
            MIGRATION_POLL,
            Backoff::Fixed,
            move || async move {
                let entry = self.inventory_entry(client, serial).await?;
                Ok::<_, Error>(match entry.as_ref().and_then(|e| e.get("mode")).and_then(Value::as_str) {
                    Some("Migration") => ConvergenceStatus::Pending,
                    Some(_) => ConvergenceStatus::Converged,
                    None => ConvergenceStatus::Pending,
                })
            },
        )
        .await?;
        if outcome == Outcome::TimedOut {
            return Err(Error::DeployTimeout {
                resource: format!("switch {serial} (migration mode)"),
            });
        }
        Ok(())
    }

    async fn set_role(&self, client: &dyn ApiClient, serial: &str, role: &str) -> Result<()> {
        let payload = json!([{ "serialNumber": serial, "role": role }]);
        client
            .save(&paths::switch_roles(), &payload)
            .await
            .map_err(step_error("set-role", serial))?;
        Ok(())
    }

    /// The four-stage fabric convergence sequence, shared by inventory adds
    /// and role changes.
    async fn fabric_convergence(
        &self,
        client: &dyn ApiClient,
        serial: &str,
        timeout: Duration,
    ) -> Result<()> {
        let resource = format!("switch {serial}");

        // Step A: poll config-preview until the entry flips to Out-of-Sync
        // (configuration pending) or is already In-Sync (nothing to do). The
        // interval halves every iteration so the already-converged case is
        // detected fast while slow initial syncs still fit the budget.
        let last_seen: Mutex<Option<String>> = Mutex::new(None);
        let seen = &last_seen;
        let fabric = self.fabric.as_str();
        let outcome = reconcile(
            &resource,
            timeout,
            Duration::from_secs((timeout.as_secs() / 2).max(1)),
            Backoff::Halving,
            move || async move {
                let status = preview_status(client, fabric, serial).await?;
                let converged = matches!(status.as_deref(), Some(IN_SYNC) | Some(OUT_OF_SYNC));
                *seen.lock().unwrap() = status;
                Ok::<_, Error>(if converged {
                    ConvergenceStatus::Converged
                } else {
                    ConvergenceStatus::Pending
                })
            },
        )
        .await?;
        if outcome == Outcome::TimedOut {
            return Err(Error::DeployTimeout {
                resource: resource.clone(),
            });
        }
        if last_seen.lock().unwrap().as_deref() == Some(IN_SYNC) {
            info!(switch = %serial, "Already in sync, skipping deploy sequence");
            return Ok(());
        }

        // Step B: deploy this switch.
        client
            .save_and_trigger(&paths::config_deploy_switch(&self.fabric, serial))
            .await
            .map_err(step_error("config-deploy-switch", &resource))?;
        // Step C: fabric-wide deploy.
        client
            .save_and_trigger(&paths::config_deploy(&self.fabric))
            .await
            .map_err(step_error("config-deploy-fabric", &resource))?;
        // Step D: persist the configuration.
        client
            .save_and_trigger(&paths::config_save(&self.fabric))
            .await
            .map_err(step_error("config-save", &resource))?;
        // Step E: second fabric-wide deploy; the save step can invalidate
        // the first one, and the call is idempotent.
        client
            .save_and_trigger(&paths::config_deploy(&self.fabric))
            .await
            .map_err(step_error("config-deploy-fabric", &resource))?;

        // Step F: one final preview check, not part of the bounded loop.
        let status = preview_status(client, &self.fabric, serial).await?;
        if status.as_deref() == Some(IN_SYNC) {
            Ok(())
        } else {
            Err(Error::Diverged {
                resource,
                detail: format!(
                    "config-preview reports {} after deploy",
                    status.as_deref().unwrap_or("no entry")
                ),
            })
        }
    }

    /// Steps after the switch exists in inventory; split out so the caller
    /// can compensate when any of them fails on a freshly created switch.
    async fn converge(
        &self,
        client: &dyn ApiClient,
        spec: &SwitchConfig,
        serial: &str,
    ) -> Result<DeployReport> {
        let timeout = Duration::from_secs(spec.deploy_timeout);
        self.wait_for_migration(client, serial, timeout).await?;

        if let Some(role) = &spec.role {
            self.set_role(client, serial, role).await?;
        }

        if !spec.deploy {
            return Ok(DeployReport::configured(serial, None));
        }
        self.fabric_convergence(client, serial, timeout).await?;
        Ok(DeployReport::deployed(serial))
    }

    async fn remove_partial(&self, client: &dyn ApiClient, serial: &str) {
        warn!(switch = %serial, "Deployment failed, removing partially onboarded switch");
        if let Err(e) = client.delete(&paths::switch(&self.fabric, serial)).await {
            warn!(switch = %serial, error = %e, "Failed to remove partially onboarded switch");
        }
    }
}

#[async_trait]
impl Reconciler for SwitchReconciler {
    type Spec = SwitchConfig;

    async fn reconcile(&self, client: &dyn ApiClient, spec: &SwitchConfig) -> Result<DeployReport> {
        info!(fabric = %self.fabric, ip = %spec.ip_address, "Reconciling switch");

        let info = self.test_reachability(client, spec).await?;
        let serial = info.serial_number.clone();

        let created = match self.inventory_entry(client, &serial).await? {
            Some(entry) => {
                // The logical name is part of the switch's identity; renaming
                // requires resource replacement, never an in-place update.
                if let Some(name) = &spec.name {
                    let current = entry.get("logicalName").and_then(Value::as_str);
                    if current.is_some_and(|c| c != name.as_str()) {
                        return Err(Error::Validation(format!(
                            "switch {serial}: name cannot be changed after onboarding \
                             (controller has '{}', config wants '{name}')",
                            current.unwrap_or_default()
                        )));
                    }
                }
                false
            }
            None => {
                self.discover(client, spec, &info).await?;
                info!(switch = %serial, "Switch added to fabric inventory");
                true
            }
        };

        match self.converge(client, spec, &serial).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if created {
                    self.remove_partial(client, &serial).await;
                }
                Err(e)
            }
        }
    }

    /// Remove the switch from the fabric and redeploy so the remaining
    /// switches drop any references to it. The key is the serial number.
    async fn finalize(&self, client: &dyn ApiClient, serial: &str) -> Result<DeployReport> {
        info!(fabric = %self.fabric, switch = %serial, "Removing switch");
        client
            .delete(&paths::switch(&self.fabric, serial))
            .await
            .map_err(step_error("delete", serial))?;
        client
            .save_and_trigger(&paths::config_deploy(&self.fabric))
            .await
            .map_err(step_error("config-deploy-fabric", serial))?;
        Ok(DeployReport::absent(serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_vocabulary_collapses_per_contract() {
        assert_eq!(collapse_preview(Some("In-Sync")), ConvergenceStatus::Converged);
        assert_eq!(collapse_preview(Some("Out-of-Sync")), ConvergenceStatus::Pending);
        assert_eq!(collapse_preview(None), ConvergenceStatus::Pending);
        assert_eq!(collapse_preview(Some("NA")), ConvergenceStatus::Unknown);
    }

    #[test]
    fn reachability_parses_first_candidate() {
        let doc = json!([{
            "serialNumber": "FDO1234",
            "sysName": "leaf-1",
            "reachable": true,
            "selectable": true,
            "auth": true,
        }]);
        let info = parse_reachability(&doc).unwrap();
        assert_eq!(info.serial_number, "FDO1234");
        assert_eq!(info.sys_name, "leaf-1");
        assert!(info.reachable && info.selectable && info.auth);
    }

    #[test]
    fn reachability_defaults_missing_flags_to_false() {
        let doc = json!([{ "serialNumber": "FDO1234" }]);
        let info = parse_reachability(&doc).unwrap();
        assert!(!info.reachable);
        assert!(!info.selectable);
        assert!(!info.auth);
    }

    #[test]
    fn reachability_requires_a_candidate() {
        assert!(parse_reachability(&json!([])).is_none());
        assert!(parse_reachability(&json!({})).is_none());
    }
}

//! Lifecycle managers for fabric resources.
//!
//! Each manager pushes desired configuration to the controller, drives the
//! kind-specific deployment pipeline (attach, trigger, poll), and reports
//! success, timeout, or failure with the controller's own error text.

pub mod interface;
pub mod network;
pub mod peering;
pub mod switch;
pub mod vrf;

use std::time::Duration;

use async_trait::async_trait;
use fabsync_client::ApiClient;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::DeployReport;
use crate::reconcile::{Backoff, ConvergenceStatus, Outcome, reconcile};

/// Trait for resource lifecycle managers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The desired-state type for this resource kind.
    type Spec;

    /// Drive the resource toward its desired state, deploying if requested.
    async fn reconcile(&self, client: &dyn ApiClient, spec: &Self::Spec) -> Result<DeployReport>;

    /// Remove the resource, detaching and redeploying first where required.
    async fn finalize(&self, client: &dyn ApiClient, key: &str) -> Result<DeployReport>;
}

/// Kind-specific convergence probe. The polling loop only ever sees the
/// collapsed `ConvergenceStatus`; the string vocabulary stays in here.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self, client: &dyn ApiClient) -> Result<ConvergenceStatus>;
}

/// Drive the shared polling loop against a kind-specific prober. The loop
/// itself never branches on resource kind.
pub(crate) async fn await_probe(
    client: &dyn ApiClient,
    probe: &dyn StatusProbe,
    resource: &str,
    timeout: Duration,
    interval: Duration,
    backoff: Backoff,
) -> Result<Outcome> {
    reconcile(resource, timeout, interval, backoff, move || {
        probe.probe(client)
    })
    .await
}

/// Success sentinel in batched attachment responses.
const ATTACH_SUCCESS: &str = "SUCCESS";

/// Every element of a batched attachment response must report success; the
/// first failing element aborts the pipeline with the controller's own text.
/// A partial-attachment failure is not retried here, it is reported.
pub(crate) fn check_attach_response(doc: &Value) -> Result<()> {
    match doc {
        Value::Object(map) => {
            for (key, entry) in map {
                let text = entry_text(entry);
                if !text.contains(ATTACH_SUCCESS) {
                    return Err(Error::Attach {
                        target: key.clone(),
                        message: text,
                    });
                }
            }
            Ok(())
        }
        Value::Array(list) => {
            for (idx, entry) in list.iter().enumerate() {
                let text = entry_text(entry);
                if !text.contains(ATTACH_SUCCESS) {
                    return Err(Error::Attach {
                        target: format!("entry {idx}"),
                        message: text,
                    });
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn entry_text(entry: &Value) -> String {
    match entry {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Wrap a client error with the pipeline step it happened in.
pub(crate) fn step_error(
    step: &'static str,
    resource: &str,
) -> impl FnOnce(fabsync_client::ApiError) -> Error {
    let resource = resource.to_string();
    move |source| Error::Step {
        step,
        resource,
        source,
    }
}

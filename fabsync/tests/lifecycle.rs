//! Lifecycle tests for the deployment pipelines, driven against the
//! scripted mock client. Polling scenarios run under paused tokio time so
//! simulated elapsed time can be asserted exactly.

mod common;

use std::time::Duration;

use serde_json::json;

use common::*;
use fabsync::error::Error;
use fabsync::model::{PeeringConfig, VrfConfig};
use fabsync::paths;
use fabsync::reconciler::Reconciler;
use fabsync::reconciler::network::NetworkReconciler;
use fabsync::reconciler::peering::PeeringReconciler;
use fabsync::reconciler::switch::SwitchReconciler;
use fabsync::reconciler::vrf::VrfReconciler;
use fabsync_client::mock::{MockClient, Verb};

#[tokio::test]
async fn deploy_without_attachments_is_rejected_before_any_call() {
    let mock = MockClient::new();
    let vrfs = VrfReconciler::new(FABRIC);
    let spec = vrf_spec("blue", Vec::new(), true);

    let err = vrfs.reconcile(&mock, &spec).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn unreachable_switch_aborts_before_discovery() {
    let mock = MockClient::new();
    mock.respond(
        Verb::Save,
        &paths::test_reachability(FABRIC),
        json!([{
            "serialNumber": "FDO1234",
            "sysName": "leaf-1",
            "reachable": true,
            "selectable": false,
            "auth": true,
        }]),
    );

    let switches = SwitchReconciler::new(FABRIC);
    let err = switches
        .reconcile(&mock, &switch_spec("10.0.0.1"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("not reachable or not selectable"));
    assert!(
        !mock.paths().iter().any(|p| p.contains("/inventory/discover")),
        "no inventory-add call may be issued for an unselectable switch"
    );
}

#[tokio::test]
async fn partial_attach_failure_surfaces_controller_text() {
    let mock = MockClient::new();
    mock.fail(Verb::Get, &paths::vrf(FABRIC, "blue"), 404, "not found");
    mock.respond(Verb::Save, &paths::vrfs(FABRIC), json!({}));
    mock.respond(
        Verb::Save,
        &paths::vrf_attachments(FABRIC),
        json!(["SUCCESS", "ERROR: vlan conflict"]),
    );

    let vrfs = VrfReconciler::new(FABRIC);
    let spec = vrf_spec(
        "blue",
        vec![attachment("FDO1", 2100), attachment("FDO2", 2100)],
        true,
    );
    let err = vrfs.reconcile(&mock, &spec).await.unwrap_err();

    assert!(matches!(err, Error::Attach { .. }));
    assert!(err.to_string().contains("ERROR: vlan conflict"));
    assert!(
        !mock
            .paths()
            .iter()
            .any(|p| *p == paths::vrf_deployments(FABRIC)),
        "no deploy trigger may be issued after a failed attach"
    );
}

#[tokio::test(start_paused = true)]
async fn network_deploy_polls_until_converged() {
    let mock = MockClient::new();
    mock.fail(Verb::Get, &paths::network(FABRIC, "web"), 404, "not found");
    mock.respond(Verb::Save, &paths::networks(FABRIC), json!({}));
    mock.respond(
        Verb::Save,
        &paths::network_attachments(FABRIC),
        json!({"web--FDO1": "SUCCESS"}),
    );
    mock.respond(Verb::Save, &paths::network_deployments(FABRIC), json!({}));

    let status_path = paths::network_attachment_status(FABRIC, "web");
    mock.respond(Verb::Get, &status_path, network_status_doc("web", &[("FDO1", "PENDING")]));
    mock.respond(Verb::Get, &status_path, network_status_doc("web", &[("FDO1", "PENDING")]));
    mock.respond(Verb::Get, &status_path, network_status_doc("web", &[("FDO1", "DEPLOYED")]));

    let networks = NetworkReconciler::new(FABRIC);
    let spec = network_spec("web", vec![attachment("FDO1", 2200)], true);

    let start = tokio::time::Instant::now();
    let report = networks.reconcile(&mock, &spec).await.unwrap();

    assert!(report.deployed);
    // Pending at 0s and 5s, converged on the 10s probe.
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn reapplying_identical_state_is_idempotent() {
    let mock = MockClient::new();
    // First apply creates, second sees the existing object and updates.
    mock.fail(Verb::Get, &paths::vrf(FABRIC, "blue"), 404, "not found");
    mock.respond(Verb::Get, &paths::vrf(FABRIC, "blue"), json!({"vrfName": "blue"}));
    mock.respond(Verb::Save, &paths::vrfs(FABRIC), json!({}));
    mock.respond(Verb::Update, &paths::vrf(FABRIC, "blue"), json!({}));
    mock.respond(
        Verb::Save,
        &paths::vrf_attachments(FABRIC),
        json!({"blue--FDO1": "SUCCESS"}),
    );
    mock.respond(Verb::Save, &paths::vrf_deployments(FABRIC), json!({}));
    mock.respond(
        Verb::Get,
        &paths::vrf_attachment_status(FABRIC, "blue"),
        vrf_status_doc("blue", &[("FDO1", "In-Sync")]),
    );

    // Duplicate serial in the intent list: the batched payload is keyed by
    // serial, last write wins.
    let spec = vrf_spec(
        "blue",
        vec![attachment("FDO1", 2100), attachment("FDO1", 2150)],
        true,
    );
    let vrfs = VrfReconciler::new(FABRIC);

    let first = vrfs.reconcile(&mock, &spec).await.unwrap();
    let second = vrfs.reconcile(&mock, &spec).await.unwrap();
    assert!(first.deployed);
    assert!(second.deployed);

    let attach_calls: Vec<_> = mock
        .calls_for(Verb::Save)
        .into_iter()
        .filter(|c| c.path == paths::vrf_attachments(FABRIC))
        .collect();
    assert_eq!(attach_calls.len(), 2);
    for call in attach_calls {
        let payload = call.payload.unwrap();
        let list = payload[0]["lanAttachList"].as_array().unwrap().clone();
        assert_eq!(list.len(), 1, "duplicate serials must collapse");
        assert_eq!(list[0]["serialNumber"], "FDO1");
        assert_eq!(list[0]["vlan"], 2150);
    }
}

#[tokio::test]
async fn deployed_vrf_cannot_be_undeployed_in_place() {
    let mock = MockClient::new();
    mock.respond(Verb::Get, &paths::vrf(FABRIC, "blue"), json!({"vrfName": "blue"}));
    mock.respond(
        Verb::Get,
        &paths::vrf_attachment_status(FABRIC, "blue"),
        vrf_status_doc("blue", &[("FDO1", "In-Sync")]),
    );

    let vrfs = VrfReconciler::new(FABRIC);
    let spec = vrf_spec("blue", vec![attachment("FDO1", 2100)], false);
    let err = vrfs.reconcile(&mock, &spec).await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("already deployed"));
    assert!(mock.calls_for(Verb::Update).is_empty());
}

#[tokio::test]
async fn vrf_finalize_detaches_redeploys_then_deletes() {
    let mock = MockClient::new();
    let status_path = paths::vrf_attachment_status(FABRIC, "blue");
    // Still attached when deletion starts, detached on the first poll.
    mock.respond(Verb::Get, &status_path, vrf_status_doc("blue", &[("FDO1", "In-Sync")]));
    mock.respond(Verb::Get, &status_path, vrf_status_doc("blue", &[("FDO1", "NA")]));
    mock.respond(
        Verb::Save,
        &paths::vrf_attachments(FABRIC),
        json!({"blue--FDO1": "SUCCESS"}),
    );
    mock.respond(Verb::Save, &paths::vrf_deployments(FABRIC), json!({}));
    mock.respond(Verb::Delete, &paths::vrf(FABRIC, "blue"), json!({}));

    let vrfs = VrfReconciler::new(FABRIC);
    let report = vrfs.finalize(&mock, "blue").await.unwrap();
    assert_eq!(report.key, "blue");

    let detach = mock
        .calls_for(Verb::Save)
        .into_iter()
        .find(|c| c.path == paths::vrf_attachments(FABRIC))
        .unwrap();
    let payload = detach.payload.as_ref().unwrap();
    assert_eq!(payload[0]["lanAttachList"][0]["deployment"], false);

    let last = mock.calls().pop().unwrap();
    assert_eq!(last.verb, Verb::Delete);
    assert_eq!(last.path, paths::vrf(FABRIC, "blue"));
}

#[tokio::test]
async fn switch_onboarding_runs_full_convergence_sequence() {
    let mock = MockClient::new();
    mock.respond(
        Verb::Save,
        &paths::test_reachability(FABRIC),
        json!([{
            "serialNumber": "FDO1234",
            "sysName": "leaf-1",
            "reachable": true,
            "selectable": true,
            "auth": true,
        }]),
    );
    // Empty inventory before discovery, populated afterwards.
    mock.respond(Verb::Get, &paths::inventory(FABRIC), json!([]));
    mock.respond(
        Verb::Get,
        &paths::inventory(FABRIC),
        json!([{"serialNumber": "FDO1234", "logicalName": "leaf-1", "mode": "Normal"}]),
    );
    mock.respond(Verb::Save, &paths::discover(FABRIC), json!({}));
    // Preview: configuration pending when polled, in sync for the final check.
    mock.respond(
        Verb::Get,
        &paths::config_preview(FABRIC),
        json!([{"switchId": "FDO1234", "status": "Out-of-Sync"}]),
    );
    mock.respond(
        Verb::Get,
        &paths::config_preview(FABRIC),
        json!([{"switchId": "FDO1234", "status": "In-Sync"}]),
    );
    mock.respond(
        Verb::SaveAndTrigger,
        &paths::config_deploy_switch(FABRIC, "FDO1234"),
        json!({}),
    );
    mock.respond(Verb::SaveAndTrigger, &paths::config_deploy(FABRIC), json!({}));
    mock.respond(Verb::SaveAndTrigger, &paths::config_save(FABRIC), json!({}));

    let switches = SwitchReconciler::new(FABRIC);
    let report = switches
        .reconcile(&mock, &switch_spec("10.0.0.1"))
        .await
        .unwrap();

    assert!(report.deployed);
    assert_eq!(report.key, "FDO1234");
    // Save once, fabric-wide deploy twice: the save can invalidate the
    // first deploy.
    let triggers = mock.calls_for(Verb::SaveAndTrigger);
    assert_eq!(
        triggers
            .iter()
            .filter(|c| c.path == paths::config_deploy(FABRIC))
            .count(),
        2
    );
    assert_eq!(
        triggers
            .iter()
            .filter(|c| c.path == paths::config_save(FABRIC))
            .count(),
        1
    );
}

#[tokio::test]
async fn failed_switch_deploy_removes_partially_onboarded_switch() {
    let mock = MockClient::new();
    mock.respond(
        Verb::Save,
        &paths::test_reachability(FABRIC),
        json!([{
            "serialNumber": "FDO1234",
            "sysName": "leaf-1",
            "reachable": true,
            "selectable": true,
            "auth": true,
        }]),
    );
    mock.respond(Verb::Get, &paths::inventory(FABRIC), json!([]));
    mock.respond(
        Verb::Get,
        &paths::inventory(FABRIC),
        json!([{"serialNumber": "FDO1234", "logicalName": "leaf-1", "mode": "Normal"}]),
    );
    mock.respond(Verb::Save, &paths::discover(FABRIC), json!({}));
    mock.respond(
        Verb::Get,
        &paths::config_preview(FABRIC),
        json!([{"switchId": "FDO1234", "status": "Out-of-Sync"}]),
    );
    mock.fail(
        Verb::SaveAndTrigger,
        &paths::config_deploy_switch(FABRIC, "FDO1234"),
        500,
        "deploy job failed",
    );
    mock.respond(Verb::Delete, &paths::switch(FABRIC, "FDO1234"), json!({}));

    let switches = SwitchReconciler::new(FABRIC);
    let err = switches
        .reconcile(&mock, &switch_spec("10.0.0.1"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("deploy job failed"));
    let deletes = mock.calls_for(Verb::Delete);
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].path, paths::switch(FABRIC, "FDO1234"));
}

#[tokio::test(start_paused = true)]
async fn peering_timeout_reports_undeployed_but_keeps_resource() {
    let mock = MockClient::new();
    let spec = PeeringConfig {
        name: "p1".to_string(),
        service_node: "sn1".to_string(),
        attached_fabric: "ext".to_string(),
        deployment_mode: None,
        routing_tag: None,
        template: None,
        deploy: true,
        deploy_timeout: 10,
    };
    let peering_path = paths::peering(FABRIC, "sn1", "ext", "p1");
    mock.fail(Verb::Get, &peering_path, 404, "not found");
    mock.respond(Verb::Get, &peering_path, json!({"status": "Pending"}));
    mock.respond(Verb::Save, &paths::peerings(FABRIC, "sn1", "ext"), json!({}));
    mock.respond(
        Verb::Save,
        &paths::peering_attachments(FABRIC, "sn1", "ext", "p1"),
        json!({}),
    );
    mock.respond(
        Verb::Save,
        &paths::peering_deployments(FABRIC, "sn1", "ext", "p1"),
        json!({}),
    );

    let peerings = PeeringReconciler::new(FABRIC);
    let report = peerings.reconcile(&mock, &spec).await.unwrap();

    assert!(!report.deployed);
    assert!(
        report
            .message
            .as_deref()
            .unwrap()
            .contains("deployment timeout occurred")
    );
    // The peering itself must not be rolled back on timeout.
    assert!(mock.calls_for(Verb::Delete).is_empty());
}

#[tokio::test]
async fn pushed_configuration_round_trips_through_wire() {
    let mock = MockClient::new();
    mock.fail(Verb::Get, &paths::vrf(FABRIC, "blue"), 404, "not found");
    mock.respond(Verb::Save, &paths::vrfs(FABRIC), json!({}));

    let mut spec = vrf_spec("blue", Vec::new(), false);
    spec.template = Some("Default_VRF".to_string());
    let vrfs = VrfReconciler::new(FABRIC);
    vrfs.reconcile(&mock, &spec).await.unwrap();

    // What went over the wire, plus a controller-added internal id.
    let mut pushed = mock.calls_for(Verb::Save)[0].payload.clone().unwrap();
    pushed
        .as_object_mut()
        .unwrap()
        .insert("id".to_string(), json!(99));

    let restored = VrfConfig::from_wire(&pushed).unwrap();
    assert_eq!(restored.name, spec.name);
    assert_eq!(restored.segment_id, spec.segment_id);
    assert_eq!(restored.vlan, spec.vlan);
    assert_eq!(restored.template, spec.template);
}

//! Shared helpers for lifecycle tests.

use fabsync::model::{Attachment, NetworkConfig, SwitchConfig, VrfConfig};
use serde_json::{Value, json};

pub const FABRIC: &str = "dc1";

pub fn attachment(serial: &str, vlan: u16) -> Attachment {
    let mut a = Attachment::new(serial);
    a.vlan = Some(vlan);
    a
}

pub fn vrf_spec(name: &str, attachments: Vec<Attachment>, deploy: bool) -> VrfConfig {
    VrfConfig {
        name: name.to_string(),
        segment_id: Some(50001),
        vlan: Some(2100),
        template: None,
        description: None,
        deploy,
        deploy_timeout: 20,
        attachments,
    }
}

pub fn network_spec(name: &str, attachments: Vec<Attachment>, deploy: bool) -> NetworkConfig {
    NetworkConfig {
        name: name.to_string(),
        vrf: Some("blue".to_string()),
        segment_id: Some(30001),
        vlan: Some(2200),
        gateway: Some("192.0.2.1/24".to_string()),
        template: None,
        description: None,
        deploy,
        deploy_timeout: 20,
        attachments,
    }
}

pub fn switch_spec(ip: &str) -> SwitchConfig {
    SwitchConfig {
        ip_address: ip.to_string(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        name: None,
        role: None,
        preserve_config: false,
        max_hops: 0,
        deploy: true,
        deploy_timeout: 60,
    }
}

/// VRF attachment enumeration with one per-switch state each.
pub fn vrf_status_doc(name: &str, states: &[(&str, &str)]) -> Value {
    let list: Vec<Value> = states
        .iter()
        .map(|(serial, state)| json!({"switchSerialNo": serial, "lanAttachState": state}))
        .collect();
    json!([{"vrfName": name, "lanAttachList": list}])
}

/// Network attachment list with one per-switch state each.
pub fn network_status_doc(name: &str, states: &[(&str, &str)]) -> Value {
    let list: Vec<Value> = states
        .iter()
        .map(|(serial, state)| json!({"switchSerialNo": serial, "attachState": state}))
        .collect();
    json!([{"networkName": name, "lanAttachList": list}])
}

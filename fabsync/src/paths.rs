//! Controller REST paths, built in one place.

pub fn logon() -> String {
    "/rest/logon".to_string()
}

// === Fabric / switch inventory ===

pub fn inventory(fabric: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/inventory")
}

pub fn test_reachability(fabric: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/inventory/test-reachability")
}

pub fn discover(fabric: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/inventory/discover")
}

pub fn config_preview(fabric: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/config-preview")
}

pub fn config_deploy(fabric: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/config-deploy")
}

pub fn config_deploy_switch(fabric: &str, serial: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/config-deploy/{serial}")
}

pub fn config_save(fabric: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/config-save")
}

pub fn switch_roles() -> String {
    "/rest/control/switches/roles".to_string()
}

pub fn switch(fabric: &str, serial: &str) -> String {
    format!("/rest/control/fabrics/{fabric}/switches/{serial}")
}

// === VRFs ===

pub fn vrfs(fabric: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/vrfs")
}

pub fn vrf(fabric: &str, name: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/vrfs/{name}")
}

pub fn vrf_attachments(fabric: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/vrfs/attachments")
}

pub fn vrf_attachment_status(fabric: &str, name: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/vrfs/attachments?vrf-names={name}")
}

pub fn vrf_deployments(fabric: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/vrfs/deployments")
}

// === Networks ===

pub fn networks(fabric: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/networks")
}

pub fn network(fabric: &str, name: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/networks/{name}")
}

pub fn network_attachments(fabric: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/networks/attachments")
}

pub fn network_attachment_status(fabric: &str, name: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/networks/attachments?network-names={name}")
}

pub fn network_deployments(fabric: &str) -> String {
    format!("/rest/top-down/fabrics/{fabric}/networks/deployments")
}

// === Interfaces ===

pub fn interfaces() -> String {
    "/rest/interface".to_string()
}

pub fn interface(serial: &str, name: &str) -> String {
    format!("/rest/interface?serialNumber={serial}&ifName={name}")
}

pub fn interface_deploy() -> String {
    "/rest/interface/deploy".to_string()
}

pub fn interface_detail(serial: &str) -> String {
    format!("/rest/interface/detail?serialNumber={serial}")
}

// === Service route peerings ===

pub fn peerings(fabric: &str, node: &str, attached_fabric: &str) -> String {
    format!("/rest/elastic-service/fabrics/{fabric}/service-nodes/{node}/peerings/{attached_fabric}")
}

pub fn peering(fabric: &str, node: &str, attached_fabric: &str, name: &str) -> String {
    format!("{}/{name}", peerings(fabric, node, attached_fabric))
}

pub fn peering_attachments(fabric: &str, node: &str, attached_fabric: &str, name: &str) -> String {
    format!("{}/attachments", peering(fabric, node, attached_fabric, name))
}

pub fn peering_detachments(fabric: &str, node: &str, attached_fabric: &str, name: &str) -> String {
    format!("{}/detachments", peering(fabric, node, attached_fabric, name))
}

pub fn peering_deployments(fabric: &str, node: &str, attached_fabric: &str, name: &str) -> String {
    format!("{}/deployments", peering(fabric, node, attached_fabric, name))
}

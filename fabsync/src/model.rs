//! Typed desired-state models and their wire-document boundary.
//!
//! The controller exchanges untyped JSON objects; everything inside the
//! engine is a typed config per resource kind. Conversion happens here and
//! nowhere else, via `to_wire`/`from_wire`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};

/// Composite identity separators are load-bearing: existing stored state and
/// controller entity ids use them verbatim.
pub const ENTITY_SEP: char = '~';
pub const IMPORT_SEP: char = ':';

/// Interface entity id as the controller knows it.
pub fn interface_entity(serial: &str, name: &str) -> String {
    format!("{serial}{ENTITY_SEP}{name}")
}

/// Paired VPC switch serials.
pub fn vpc_pair(first: &str, second: &str) -> String {
    format!("{first}{ENTITY_SEP}{second}")
}

/// Import id tuple, `:`-joined.
pub fn import_id(parts: &[&str]) -> String {
    parts.join(&IMPORT_SEP.to_string())
}

/// Split an import id back into its tuple.
pub fn split_import_id(id: &str) -> Vec<&str> {
    id.split(IMPORT_SEP).collect()
}

fn default_true() -> bool {
    true
}

/// Default convergence budget in seconds.
fn default_deploy_timeout() -> u64 {
    300
}

// === Attachments ===

/// Binding of a VRF or network to one switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub serial_number: String,
    /// false detaches the resource from this switch.
    #[serde(default = "default_true")]
    pub attach: bool,
    #[serde(default)]
    pub vlan: Option<u16>,
    /// Switch ports carrying the resource.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub freeform_config: Option<String>,
}

impl Attachment {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            attach: true,
            vlan: None,
            ports: Vec::new(),
            freeform_config: None,
        }
    }
}

/// Collapse an attachment list so each switch serial appears once,
/// last-write-wins. The batched attach payload is keyed by serial; duplicate
/// entries would otherwise race at the controller.
pub fn dedup_attachments(attachments: &[Attachment]) -> Vec<Attachment> {
    let mut out: Vec<Attachment> = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        match out
            .iter_mut()
            .find(|a| a.serial_number == attachment.serial_number)
        {
            Some(slot) => *slot = attachment.clone(),
            None => out.push(attachment.clone()),
        }
    }
    out
}

// === Per-kind configs ===

/// A switch to onboard into the fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub ip_address: String,
    pub username: String,
    pub password: String,
    /// Logical switch name; immutable once onboarded.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub preserve_config: bool,
    #[serde(default)]
    pub max_hops: u32,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: u64,
}

/// A VRF and the switches that should carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrfConfig {
    pub name: String,
    #[serde(default)]
    pub segment_id: Option<u32>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: u64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl VrfConfig {
    pub fn to_wire(&self, fabric: &str) -> Value {
        let mut doc = json!({
            "fabric": fabric,
            "vrfName": self.name,
        });
        let map = doc.as_object_mut().expect("literal object");
        if let Some(id) = self.segment_id {
            map.insert("vrfId".to_string(), json!(id));
        }
        if let Some(vlan) = self.vlan {
            map.insert("vlanId".to_string(), json!(vlan));
        }
        if let Some(template) = &self.template {
            map.insert("vrfTemplate".to_string(), json!(template));
        }
        if let Some(description) = &self.description {
            map.insert("description".to_string(), json!(description));
        }
        doc
    }

    /// Map a controller document back into a config, ignoring
    /// controller-added fields such as internal ids.
    pub fn from_wire(doc: &Value) -> Result<Self> {
        let name = str_field(doc, "vrfName")
            .ok_or_else(|| Error::Validation("vrf document has no vrfName".to_string()))?;
        Ok(Self {
            name: name.to_string(),
            segment_id: u64_field(doc, "vrfId").map(|v| v as u32),
            vlan: u64_field(doc, "vlanId").map(|v| v as u16),
            template: str_field(doc, "vrfTemplate").map(str::to_string),
            description: str_field(doc, "description").map(str::to_string),
            deploy: true,
            deploy_timeout: default_deploy_timeout(),
            attachments: Vec::new(),
        })
    }
}

/// A network and the switches that should carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    /// Owning VRF; None for layer-2-only networks.
    #[serde(default)]
    pub vrf: Option<String>,
    #[serde(default)]
    pub segment_id: Option<u32>,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: u64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl NetworkConfig {
    pub fn to_wire(&self, fabric: &str) -> Value {
        let mut doc = json!({
            "fabric": fabric,
            "networkName": self.name,
        });
        let map = doc.as_object_mut().expect("literal object");
        if let Some(vrf) = &self.vrf {
            map.insert("vrf".to_string(), json!(vrf));
        }
        if let Some(id) = self.segment_id {
            map.insert("networkId".to_string(), json!(id));
        }
        if let Some(vlan) = self.vlan {
            map.insert("vlanId".to_string(), json!(vlan));
        }
        if let Some(gateway) = &self.gateway {
            map.insert("gatewayIpAddress".to_string(), json!(gateway));
        }
        if let Some(template) = &self.template {
            map.insert("networkTemplate".to_string(), json!(template));
        }
        if let Some(description) = &self.description {
            map.insert("description".to_string(), json!(description));
        }
        doc
    }

    pub fn from_wire(doc: &Value) -> Result<Self> {
        let name = str_field(doc, "networkName")
            .ok_or_else(|| Error::Validation("network document has no networkName".to_string()))?;
        Ok(Self {
            name: name.to_string(),
            vrf: str_field(doc, "vrf").map(str::to_string),
            segment_id: u64_field(doc, "networkId").map(|v| v as u32),
            vlan: u64_field(doc, "vlanId").map(|v| v as u16),
            gateway: str_field(doc, "gatewayIpAddress").map(str::to_string),
            template: str_field(doc, "networkTemplate").map(str::to_string),
            description: str_field(doc, "description").map(str::to_string),
            deploy: true,
            deploy_timeout: default_deploy_timeout(),
            attachments: Vec::new(),
        })
    }
}

/// A switch interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub serial_number: String,
    /// Interface name, e.g. "Ethernet1/1".
    pub name: String,
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default = "default_true")]
    pub admin_state: bool,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: u64,
}

impl InterfaceConfig {
    /// Controller entity id, `serial~name`.
    pub fn entity_id(&self) -> String {
        interface_entity(&self.serial_number, &self.name)
    }

    pub fn to_wire(&self, fabric: &str) -> Value {
        let mut doc = json!({
            "fabric": fabric,
            "serialNumber": self.serial_number,
            "ifName": self.name,
            "adminState": self.admin_state,
        });
        let map = doc.as_object_mut().expect("literal object");
        if let Some(policy) = &self.policy {
            map.insert("policy".to_string(), json!(policy));
        }
        if let Some(vlan) = self.vlan {
            map.insert("vlanId".to_string(), json!(vlan));
        }
        if let Some(description) = &self.description {
            map.insert("description".to_string(), json!(description));
        }
        doc
    }
}

/// A service route peering between a service node and an attached fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeeringConfig {
    pub name: String,
    pub service_node: String,
    pub attached_fabric: String,
    #[serde(default)]
    pub deployment_mode: Option<String>,
    #[serde(default)]
    pub routing_tag: Option<u32>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_true")]
    pub deploy: bool,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: u64,
}

impl PeeringConfig {
    /// Import id tuple, `fabric:node:attached_fabric:name`.
    pub fn import_key(&self, fabric: &str) -> String {
        import_id(&[fabric, &self.service_node, &self.attached_fabric, &self.name])
    }

    pub fn to_wire(&self, fabric: &str) -> Value {
        let mut doc = json!({
            "fabricName": fabric,
            "serviceNodeName": self.service_node,
            "attachedFabricName": self.attached_fabric,
            "peeringName": self.name,
        });
        let map = doc.as_object_mut().expect("literal object");
        if let Some(mode) = &self.deployment_mode {
            map.insert("deploymentMode".to_string(), json!(mode));
        }
        if let Some(tag) = self.routing_tag {
            map.insert("routingTag".to_string(), json!(tag));
        }
        if let Some(template) = &self.template {
            map.insert("serviceTemplate".to_string(), json!(template));
        }
        doc
    }
}

// === CLI document ===

/// The declared state of one fabric, as read from the CLI input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredState {
    pub fabric: String,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
    #[serde(default)]
    pub vrfs: Vec<VrfConfig>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub peerings: Vec<PeeringConfig>,
}

// === Reports ===

/// Lifecycle phase after a reconcile or finalize pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Present on the controller, not (fully) deployed to devices.
    Configured,
    /// Converged onto the target devices.
    Deployed,
    /// Removed from the controller.
    Absent,
}

/// Result of one reconcile/finalize pass over a resource.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub key: String,
    pub phase: Phase,
    pub deployed: bool,
    pub message: Option<String>,
}

impl DeployReport {
    pub fn deployed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            phase: Phase::Deployed,
            deployed: true,
            message: None,
        }
    }

    pub fn configured(key: impl Into<String>, message: Option<String>) -> Self {
        Self {
            key: key.into(),
            phase: Phase::Configured,
            deployed: false,
            message,
        }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            phase: Phase::Absent,
            deployed: false,
            message: None,
        }
    }
}

// === Wire helpers ===

pub(crate) fn str_field<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

pub(crate) fn u64_field(doc: &Value, key: &str) -> Option<u64> {
    doc.get(key).and_then(Value::as_u64)
}

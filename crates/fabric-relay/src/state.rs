use std::collections::BTreeMap;

use fabric_core::entity::{DeviceId, DeviceType, EntityId};
use fabric_core::envelope::DeviceInfo;
use fabric_core::payload::DeviceStatusEntry;

// ─── Client registry ──────────────────────────────────────────────────────

/// Opaque per-connection id assigned by the I/O layer.
pub type ClientId = String;

/// Relay-side view of one connected client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Client {
    pub ip: String,
    /// Milliseconds since the Unix epoch.
    pub connected_at: i64,
    pub authenticated: bool,
    pub device_id: Option<DeviceId>,
    pub device_type: Option<DeviceType>,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub role: Option<String>,
    /// The conversation a viewer is bound to.
    pub bound_conversation: Option<EntityId>,
}

impl Client {
    pub fn connected(ip: impl Into<String>, connected_at: i64) -> Self {
        Client {
            ip: ip.into(),
            connected_at,
            ..Default::default()
        }
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            device_id: self.device_id?,
            device_type: self.device_type?,
            name: self.name.clone().unwrap_or_default(),
            icon: self.icon.clone(),
        })
    }

    pub fn status_entry(&self) -> Option<DeviceStatusEntry> {
        Some(DeviceStatusEntry {
            device_id: self.device_id?,
            device_type: self.device_type?,
            name: self.name.clone().unwrap_or_default(),
            icon: self.icon.clone(),
            role: self.role.clone(),
            connected_at: self.connected_at,
        })
    }

    pub fn is_type(&self, t: DeviceType) -> bool {
        self.authenticated && self.device_type == Some(t)
    }
}

/// Ordered map so reducer output is deterministic for identical inputs.
pub type Clients = BTreeMap<ClientId, Client>;

/// Partial update applied by the I/O layer on behalf of the reducer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientUpdate {
    pub authenticated: Option<bool>,
    pub device_id: Option<DeviceId>,
    pub device_type: Option<DeviceType>,
    pub name: Option<String>,
    pub icon: Option<String>,
    pub role: Option<String>,
    pub bound_conversation: Option<EntityId>,
}

impl ClientUpdate {
    pub fn apply(&self, client: &mut Client) {
        if let Some(a) = self.authenticated {
            client.authenticated = a;
        }
        if let Some(d) = self.device_id {
            client.device_id = Some(d);
        }
        if let Some(t) = self.device_type {
            client.device_type = Some(t);
        }
        if let Some(n) = &self.name {
            client.name = Some(n.clone());
        }
        if let Some(i) = &self.icon {
            client.icon = Some(i.clone());
        }
        if let Some(r) = &self.role {
            client.role = Some(r.clone());
        }
        if let Some(c) = self.bound_conversation {
            client.bound_conversation = Some(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_merges_only_set_fields() {
        let mut client = Client::connected("1.2.3.4", 10);
        client.name = Some("before".into());

        let update = ClientUpdate {
            authenticated: Some(true),
            device_type: Some(DeviceType::App),
            ..Default::default()
        };
        update.apply(&mut client);
        assert!(client.authenticated);
        assert_eq!(client.device_type, Some(DeviceType::App));
        assert_eq!(client.name.as_deref(), Some("before"));
    }

    #[test]
    fn device_info_requires_identity() {
        let mut client = Client::connected("1.2.3.4", 10);
        assert!(client.device_info().is_none());
        client.device_id = Some(DeviceId::from_raw(1));
        client.device_type = Some(DeviceType::Pylon);
        client.name = Some("pylon-1".into());
        let info = client.device_info().unwrap();
        assert_eq!(info.name, "pylon-1");
    }
}

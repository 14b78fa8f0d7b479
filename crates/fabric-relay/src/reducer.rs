use fabric_core::entity::{DeviceId, DeviceType, Env};
use fabric_core::envelope::{msg, Broadcast, Envelope};
use fabric_core::payload::{
    parse_payload, AuthPayload, AuthResultPayload, ClientDisconnectPayload, DeviceStatusEntry,
    DeviceStatusPayload,
};

use crate::allocator::IndexAllocator;
use crate::devices::{DeviceTable, ShareValidator};
use crate::state::{Client, ClientId, ClientUpdate, Clients};

// ─── Events and actions ───────────────────────────────────────────────────

/// What happened on one connection. Frames arrive as raw text so the
/// reducer owns malformed-JSON policy (drop frame, keep connection).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Frame(String),
    Disconnected,
}

/// The reducer's entire output vocabulary. The I/O layer is the only thing
/// that writes sockets or mutates the registry; handlers never touch
/// connection objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send {
        client_id: ClientId,
        envelope: Envelope,
    },
    Broadcast {
        client_ids: Vec<ClientId>,
        envelope: Envelope,
    },
    UpdateClient {
        client_id: ClientId,
        update: ClientUpdate,
    },
    AllocateIndex {
        index: u8,
    },
    ReleaseIndex {
        index: u8,
    },
}

/// Immutable inputs for one reduction. `now_ms` is injected so identical
/// calls produce identical action lists.
pub struct ReduceCtx<'a> {
    pub clients: &'a Clients,
    pub devices: &'a DeviceTable,
    pub allocator: &'a IndexAllocator,
    pub shares: &'a dyn ShareValidator,
    pub env: Env,
    pub now_ms: i64,
}

impl ReduceCtx<'_> {
    fn envelope(&self, kind: &str, payload: serde_json::Value) -> Envelope {
        let mut env = Envelope::new(kind, payload);
        env.timestamp = self.now_ms;
        env
    }

    fn client(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Authenticated clients of one type, in deterministic id order.
    fn of_type(&self, t: DeviceType) -> impl Iterator<Item = (&ClientId, &Client)> {
        self.clients.iter().filter(move |(_, c)| c.is_type(t))
    }
}

// ─── Entry point ──────────────────────────────────────────────────────────

/// Pure relay handler: `(state, event) -> actions`.
pub fn reduce(ctx: &ReduceCtx<'_>, client_id: &str, event: ClientEvent) -> Vec<Action> {
    match event {
        ClientEvent::Connected => vec![Action::Send {
            client_id: client_id.to_string(),
            envelope: ctx.envelope(msg::CONNECTED, serde_json::json!({ "clientId": client_id })),
        }],
        ClientEvent::Frame(text) => match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => on_frame(ctx, client_id, envelope),
            // Malformed JSON: frame dropped, connection preserved.
            Err(_) => vec![],
        },
        ClientEvent::Disconnected => on_disconnect(ctx, client_id),
    }
}

fn on_frame(ctx: &ReduceCtx<'_>, client_id: &str, envelope: Envelope) -> Vec<Action> {
    let Some(client) = ctx.client(client_id) else {
        return vec![];
    };

    match envelope.kind.as_str() {
        msg::AUTH => on_auth(ctx, client_id, client, &envelope),
        msg::PING => vec![Action::Send {
            client_id: client_id.to_string(),
            envelope: ctx.envelope(msg::PONG, serde_json::json!({})),
        }],
        msg::PONG => vec![],
        msg::GET_DEVICES => vec![Action::Send {
            client_id: client_id.to_string(),
            envelope: ctx.envelope(
                msg::DEVICE_LIST,
                serde_json::to_value(DeviceStatusPayload {
                    devices: status_entries(ctx, None),
                })
                .expect("device list serialises"),
            ),
        }],
        _ if !client.authenticated => vec![Action::Send {
            client_id: client_id.to_string(),
            envelope: ctx.envelope(msg::ERROR, serde_json::json!({ "error": "Not authenticated" })),
        }],
        _ => route(ctx, client_id, client, envelope),
    }
}

// ─── Authentication ───────────────────────────────────────────────────────

fn on_auth(
    ctx: &ReduceCtx<'_>,
    client_id: &str,
    client: &Client,
    envelope: &Envelope,
) -> Vec<Action> {
    let payload: AuthPayload = match parse_payload(envelope) {
        Ok(p) => p,
        Err(e) => return vec![auth_failure(ctx, client_id, &e.to_string())],
    };

    match payload.device_type {
        DeviceType::Pylon => auth_pylon(ctx, client_id, client, &payload),
        DeviceType::App => auth_assigned(ctx, client_id, client, &payload, DeviceType::App, None),
        DeviceType::Viewer => {
            let Some(share_id) = payload.share_id.as_deref() else {
                return vec![auth_failure(ctx, client_id, "shareId required for viewer")];
            };
            match ctx.shares.validate(share_id) {
                Some(conversation) => auth_assigned(
                    ctx,
                    client_id,
                    client,
                    &payload,
                    DeviceType::Viewer,
                    Some(conversation),
                ),
                None => vec![auth_failure(ctx, client_id, "invalid share id")],
            }
        }
    }
}

fn auth_pylon(
    ctx: &ReduceCtx<'_>,
    client_id: &str,
    client: &Client,
    payload: &AuthPayload,
) -> Vec<Action> {
    let Some(device_id) = payload.device_id else {
        return vec![auth_failure(ctx, client_id, "deviceId required for pylon")];
    };
    let Some(entry) = ctx.devices.get(device_id) else {
        return vec![auth_failure(ctx, client_id, "unknown device")];
    };
    if !entry.ip_allowed(&client.ip) {
        return vec![auth_failure(ctx, client_id, "ip not allowed")];
    }
    if ctx
        .of_type(DeviceType::Pylon)
        .any(|(id, c)| id != client_id && c.device_id == Some(device_id))
    {
        return vec![auth_failure(ctx, client_id, "device already connected")];
    }

    let update = ClientUpdate {
        authenticated: Some(true),
        device_id: Some(device_id),
        device_type: Some(DeviceType::Pylon),
        name: Some(entry.name.clone()),
        icon: entry.icon.clone(),
        role: entry.role.clone(),
        bound_conversation: None,
    };
    finish_auth(ctx, client_id, client, update, None)
}

/// Apps and viewers: server-assigned identity from the index pool.
fn auth_assigned(
    ctx: &ReduceCtx<'_>,
    client_id: &str,
    client: &Client,
    payload: &AuthPayload,
    device_type: DeviceType,
    bound_conversation: Option<fabric_core::entity::EntityId>,
) -> Vec<Action> {
    let Some(index) = ctx.allocator.peek_free() else {
        return vec![auth_failure(ctx, client_id, "no free client slots")];
    };
    let device_id = match DeviceId::pack(ctx.env, device_type, index) {
        Ok(id) => id,
        Err(e) => return vec![auth_failure(ctx, client_id, &e.to_string())],
    };
    let name = payload
        .name
        .clone()
        .unwrap_or_else(|| format!("{}-{index}", device_type.as_str()));

    let update = ClientUpdate {
        authenticated: Some(true),
        device_id: Some(device_id),
        device_type: Some(device_type),
        name: Some(name),
        icon: None,
        role: None,
        bound_conversation,
    };
    finish_auth(ctx, client_id, client, update, Some(index))
}

fn finish_auth(
    ctx: &ReduceCtx<'_>,
    client_id: &str,
    client: &Client,
    update: ClientUpdate,
    allocated: Option<u8>,
) -> Vec<Action> {
    let mut authed = client.clone();
    update.apply(&mut authed);

    let mut actions = Vec::new();
    if let Some(index) = allocated {
        actions.push(Action::AllocateIndex { index });
    }
    actions.push(Action::UpdateClient {
        client_id: client_id.to_string(),
        update,
    });
    actions.push(Action::Send {
        client_id: client_id.to_string(),
        envelope: ctx.envelope(
            msg::AUTH_RESULT,
            serde_json::to_value(AuthResultPayload {
                success: true,
                error: None,
                device_id: authed.device_id,
                device: authed.device_info(),
            })
            .expect("auth result serialises"),
        ),
    });

    // Fresh device_status to pylons and apps, including the new client.
    let targets = status_targets(ctx, Some((client_id, &authed)), None);
    if !targets.is_empty() {
        actions.push(Action::Broadcast {
            client_ids: targets,
            envelope: ctx.envelope(
                msg::DEVICE_STATUS,
                serde_json::to_value(DeviceStatusPayload {
                    devices: status_entries_with(ctx, Some((client_id, &authed)), None),
                })
                .expect("device status serialises"),
            ),
        });
    }
    actions
}

fn auth_failure(ctx: &ReduceCtx<'_>, client_id: &str, error: &str) -> Action {
    Action::Send {
        client_id: client_id.to_string(),
        envelope: ctx.envelope(
            msg::AUTH_RESULT,
            serde_json::to_value(AuthResultPayload {
                success: false,
                error: Some(error.to_string()),
                device_id: None,
                device: None,
            })
            .expect("auth result serialises"),
        ),
    }
}

// ─── Disconnect ───────────────────────────────────────────────────────────

fn on_disconnect(ctx: &ReduceCtx<'_>, client_id: &str) -> Vec<Action> {
    let Some(client) = ctx.client(client_id) else {
        return vec![];
    };
    if !client.authenticated {
        return vec![];
    }

    let mut actions = Vec::new();
    let device_type = client.device_type;

    if let (Some(device_id), Some(t)) = (client.device_id, device_type) {
        if t != DeviceType::Pylon {
            actions.push(Action::ReleaseIndex {
                index: device_id.index(),
            });
            // Pylons learn about the departed client so they can drop its
            // pending transfers and subscriptions.
            let pylons: Vec<ClientId> = ctx
                .of_type(DeviceType::Pylon)
                .map(|(id, _)| id.clone())
                .collect();
            if !pylons.is_empty() {
                actions.push(Action::Broadcast {
                    client_ids: pylons,
                    envelope: ctx.envelope(
                        msg::CLIENT_DISCONNECT,
                        serde_json::to_value(ClientDisconnectPayload {
                            device_id,
                            device_type: t,
                        })
                        .expect("client disconnect serialises"),
                    ),
                });
            }
        }
    }

    // Everyone else gets a fresh device list without the departed client.
    let remaining_status = status_targets(ctx, None, Some(client_id));
    let targets: Vec<ClientId> = match device_type {
        // Non-pylon disconnects already notified pylons above.
        Some(t) if t != DeviceType::Pylon => remaining_status
            .into_iter()
            .filter(|id| {
                ctx.client(id)
                    .map(|c| c.device_type != Some(DeviceType::Pylon))
                    .unwrap_or(false)
            })
            .collect(),
        _ => remaining_status,
    };
    if !targets.is_empty() {
        actions.push(Action::Broadcast {
            client_ids: targets,
            envelope: ctx.envelope(
                msg::DEVICE_STATUS,
                serde_json::to_value(DeviceStatusPayload {
                    devices: status_entries(ctx, Some(client_id)),
                })
                .expect("device status serialises"),
            ),
        });
    }
    actions
}

// ─── Routing ──────────────────────────────────────────────────────────────

fn route(
    ctx: &ReduceCtx<'_>,
    client_id: &str,
    sender: &Client,
    mut envelope: Envelope,
) -> Vec<Action> {
    let sender_type = match sender.device_type {
        Some(t) => t,
        None => return vec![],
    };

    // Viewers are never senders.
    if sender_type == DeviceType::Viewer {
        return vec![];
    }

    // The relay owns `from`; senders cannot forge it.
    envelope.from = sender.device_info();

    let targets: Vec<ClientId> = if let Some(to) = envelope.to.clone() {
        explicit_targets(ctx, &to)
    } else if let Some(b) = envelope.broadcast {
        broadcast_targets(ctx, client_id, b, &envelope)
    } else {
        default_targets(ctx, client_id, sender_type)
    };

    if targets.is_empty() {
        return vec![];
    }
    vec![Action::Broadcast {
        client_ids: targets,
        envelope,
    }]
}

/// Each listed device id reaches at most one authenticated client.
fn explicit_targets(ctx: &ReduceCtx<'_>, to: &[DeviceId]) -> Vec<ClientId> {
    let mut targets = Vec::new();
    for device_id in to {
        if let Some((id, _)) = ctx
            .clients
            .iter()
            .find(|(_, c)| c.authenticated && c.device_id == Some(*device_id))
        {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }
    }
    targets
}

fn broadcast_targets(
    ctx: &ReduceCtx<'_>,
    sender_id: &str,
    broadcast: Broadcast,
    envelope: &Envelope,
) -> Vec<ClientId> {
    let conversation = envelope.payload_conversation_id();
    let viewer_matches = |c: &Client| {
        c.bound_conversation
            .map(|bound| Some(bound.raw()) == conversation)
            .unwrap_or(false)
    };

    let mut targets = Vec::new();
    for (id, client) in ctx.clients.iter() {
        if id == sender_id || !client.authenticated {
            continue;
        }
        let included = match (broadcast, client.device_type) {
            (Broadcast::All, Some(DeviceType::Viewer)) => viewer_matches(client),
            (Broadcast::All, Some(_)) => true,
            (Broadcast::Pylons, Some(DeviceType::Pylon)) => true,
            (Broadcast::Apps, Some(DeviceType::App)) => true,
            (Broadcast::Viewers, Some(DeviceType::Viewer)) => viewer_matches(client),
            _ => false,
        };
        if included {
            targets.push(id.clone());
        }
    }
    targets
}

/// No `to`, no `broadcast`: the sender's type picks the rule. Pylons fan
/// out to apps; apps reach the single registered pylon.
fn default_targets(ctx: &ReduceCtx<'_>, sender_id: &str, sender_type: DeviceType) -> Vec<ClientId> {
    match sender_type {
        DeviceType::Pylon => ctx
            .of_type(DeviceType::App)
            .filter(|(id, _)| id.as_str() != sender_id)
            .map(|(id, _)| id.clone())
            .collect(),
        DeviceType::App => ctx
            .of_type(DeviceType::Pylon)
            .map(|(id, _)| id.clone())
            .take(1)
            .collect(),
        DeviceType::Viewer => vec![],
    }
}

// ─── Device status helpers ────────────────────────────────────────────────

/// Status entries for every authenticated client, optionally excluding one.
fn status_entries(ctx: &ReduceCtx<'_>, exclude: Option<&str>) -> Vec<DeviceStatusEntry> {
    status_entries_with(ctx, None, exclude)
}

fn status_entries_with(
    ctx: &ReduceCtx<'_>,
    include: Option<(&str, &Client)>,
    exclude: Option<&str>,
) -> Vec<DeviceStatusEntry> {
    let mut entries: Vec<DeviceStatusEntry> = ctx
        .clients
        .iter()
        .filter(|(id, c)| {
            c.authenticated
                && Some(id.as_str()) != exclude
                && include.map(|(iid, _)| iid != id.as_str()).unwrap_or(true)
        })
        .filter_map(|(_, c)| c.status_entry())
        .collect();
    if let Some((_, client)) = include {
        if let Some(entry) = client.status_entry() {
            entries.push(entry);
        }
    }
    entries.sort_by_key(|e| e.device_id.raw());
    entries
}

/// Pylon and app client ids that receive `device_status`, with an optional
/// not-yet-applied inclusion and an exclusion.
fn status_targets(
    ctx: &ReduceCtx<'_>,
    include: Option<(&str, &Client)>,
    exclude: Option<&str>,
) -> Vec<ClientId> {
    let mut targets: Vec<ClientId> = ctx
        .clients
        .iter()
        .filter(|(id, c)| {
            c.authenticated
                && Some(id.as_str()) != exclude
                && include.map(|(iid, _)| iid != id.as_str()).unwrap_or(true)
                && c.device_type != Some(DeviceType::Viewer)
        })
        .map(|(id, _)| id.clone())
        .collect();
    if let Some((id, client)) = include {
        if client.device_type != Some(DeviceType::Viewer) {
            targets.push(id.to_string());
        }
    }
    targets.sort();
    targets
}

// ─── Tests ────────────────────────────────────────────────────────────────

use crate::channel::PresenceMemberInfo;
use crate::error::Result;
use crate::websocket::{SocketId, WebSocketRef};
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use tracing::debug;

type Hasher = ahash::RandomState;

/// Per-app connection, channel and presence bookkeeping.
///
/// All maps are concurrent; read paths collect snapshots so broadcasts never
/// iterate a map while subscriptions mutate it.
pub struct Namespace {
    pub app_id: String,
    pub sockets: DashMap<SocketId, WebSocketRef, Hasher>,
    channels: DashMap<String, DashSet<SocketId, Hasher>, Hasher>,
    /// channel -> socket -> presence identity.
    presence: DashMap<String, DashMap<SocketId, PresenceMemberInfo, Hasher>, Hasher>,
    /// signed-in user -> sockets, for whisper/user targeting.
    users: DashMap<String, DashSet<SocketId, Hasher>, Hasher>,
}

impl Namespace {
    pub fn new(app_id: String) -> Self {
        Self {
            app_id,
            sockets: DashMap::with_hasher(Hasher::new()),
            channels: DashMap::with_hasher(Hasher::new()),
            presence: DashMap::with_hasher(Hasher::new()),
            users: DashMap::with_hasher(Hasher::new()),
        }
    }

    pub fn add_socket(&self, ws: WebSocketRef) {
        self.sockets.insert(ws.socket_id.clone(), ws);
    }

    pub fn get_connection(&self, socket_id: &SocketId) -> Option<WebSocketRef> {
        self.sockets.get(socket_id).map(|e| e.value().clone())
    }

    pub fn remove_connection(&self, socket_id: &SocketId) {
        self.sockets.remove(socket_id);
    }

    /// Adds a socket to a channel, creating the channel on first member.
    /// Returns `false` when the socket was already subscribed.
    pub fn add_channel_to_socket(&self, channel: &str, socket_id: &SocketId) -> bool {
        let members = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| DashSet::with_hasher(Hasher::new()));
        members.insert(socket_id.clone())
    }

    /// Removes a socket from a channel. The channel is destroyed the moment
    /// its member set becomes empty; no empty channels linger.
    pub fn remove_channel_from_socket(&self, channel: &str, socket_id: &SocketId) -> bool {
        let removed = match self.channels.get(channel) {
            Some(members) => members.remove(socket_id).is_some(),
            None => false,
        };

        if removed {
            let now_empty = self.channels.remove_if(channel, |_, members| members.is_empty());
            if now_empty.is_some() {
                self.presence.remove(channel);
                debug!("Channel {} destroyed (no members left)", channel);
            }
        }

        removed
    }

    pub fn is_in_channel(&self, channel: &str, socket_id: &SocketId) -> bool {
        self.channels
            .get(channel)
            .map(|members| members.contains(socket_id))
            .unwrap_or(false)
    }

    pub fn get_channel_sockets(&self, channel: &str) -> Vec<SocketId> {
        self.channels
            .get(channel)
            .map(|members| members.iter().map(|id| id.key().clone()).collect())
            .unwrap_or_default()
    }

    pub fn channel_socket_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Stable snapshot of the live writers in a channel, with the `except`
    /// exclusion applied during collection. Members removed after the
    /// snapshot is taken simply see their queue dropped.
    pub fn get_channel_socket_refs_except(
        &self,
        channel: &str,
        except: Option<&SocketId>,
    ) -> Vec<WebSocketRef> {
        let Some(members) = self.channels.get(channel) else {
            return Vec::new();
        };
        members
            .iter()
            .filter(|id| except != Some(id.key()))
            .filter_map(|id| self.sockets.get(id.key()).map(|e| e.value().clone()))
            .collect()
    }

    pub fn remove_channel(&self, channel: &str) {
        self.channels.remove(channel);
        self.presence.remove(channel);
    }

    pub fn channel_exists(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn add_presence_member(&self, channel: &str, socket_id: &SocketId, member: PresenceMemberInfo) {
        let members = self
            .presence
            .entry(channel.to_string())
            .or_insert_with(|| DashMap::with_hasher(Hasher::new()));
        members.insert(socket_id.clone(), member);
    }

    pub fn remove_presence_member(
        &self,
        channel: &str,
        socket_id: &SocketId,
    ) -> Option<PresenceMemberInfo> {
        self.presence
            .get(channel)
            .and_then(|members| members.remove(socket_id).map(|(_, info)| info))
    }

    pub fn get_presence_member(
        &self,
        channel: &str,
        socket_id: &SocketId,
    ) -> Option<PresenceMemberInfo> {
        self.presence
            .get(channel)
            .and_then(|members| members.get(socket_id).map(|e| e.value().clone()))
    }

    /// Presence roster collapsed by `user_id`: one entry per user however
    /// many connections that user holds.
    pub fn get_channel_members(&self, channel: &str) -> HashMap<String, PresenceMemberInfo> {
        let mut collapsed = HashMap::new();
        if let Some(members) = self.presence.get(channel) {
            for entry in members.iter() {
                collapsed
                    .entry(entry.value().user_id.clone())
                    .or_insert_with(|| entry.value().clone());
            }
        }
        collapsed
    }

    /// How many connections of `user_id` remain in the presence channel.
    /// Drives the first-join/last-leave rule for member events.
    pub fn presence_connection_count(&self, channel: &str, user_id: &str) -> usize {
        self.presence
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter(|e| e.value().user_id == user_id)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn add_user(&self, user_id: &str, socket_id: &SocketId) {
        let sockets = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| DashSet::with_hasher(Hasher::new()));
        sockets.insert(socket_id.clone());
    }

    pub fn remove_user(&self, user_id: &str, socket_id: &SocketId) {
        let mut drop_entry = false;
        if let Some(sockets) = self.users.get(user_id) {
            sockets.remove(socket_id);
            drop_entry = sockets.is_empty();
        }
        if drop_entry {
            self.users.remove_if(user_id, |_, sockets| sockets.is_empty());
        }
    }

    pub fn get_user_sockets(&self, user_id: &str) -> Vec<WebSocketRef> {
        self.users
            .get(user_id)
            .map(|sockets| {
                sockets
                    .iter()
                    .filter_map(|id| self.sockets.get(id.key()).map(|e| e.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn terminate_user_connections(&self, user_id: &str) -> Result<()> {
        for ws in self.get_user_sockets(user_id) {
            ws.close(4009, "You got disconnected by the app.".to_string())
                .await;
        }
        Ok(())
    }

    pub fn sockets_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn get_channels_with_socket_count(&self) -> HashMap<String, usize> {
        self.channels
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect()
    }

    /// Channel subscriptions of one socket; used by close teardown.
    pub fn channels_for_socket(&self, socket_id: &SocketId) -> Vec<String> {
        self.channels
            .iter()
            .filter(|e| e.value().contains(socket_id))
            .map(|e| e.key().clone())
            .collect()
    }
}

pub mod handler;
pub mod local_adapter;

pub use handler::ConnectionHandler;

use crate::channel::PresenceMemberInfo;
use crate::error::Result;
use crate::namespace::Namespace;
use crate::protocol::messages::PusherMessage;
use crate::websocket::{SocketId, WebSocketRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Connection registry seam. The core ships the in-process
/// [`local_adapter::LocalAdapter`]; a replicating implementation can sit
/// behind the same trait without touching the protocol layer.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn init(&mut self);

    async fn get_namespace(&mut self, app_id: &str) -> Option<Arc<Namespace>>;

    async fn add_socket(&mut self, ws: WebSocketRef, app_id: &str) -> Result<()>;

    async fn get_connection(&mut self, socket_id: &SocketId, app_id: &str) -> Option<WebSocketRef>;

    async fn remove_connection(&mut self, socket_id: &SocketId, app_id: &str) -> Result<()>;

    async fn send_message(
        &mut self,
        app_id: &str,
        socket_id: &SocketId,
        message: PusherMessage,
    ) -> Result<()>;

    /// Broadcast to a channel, excluding at most one socket. Iterates a
    /// stable member snapshot taken at call time.
    async fn send(
        &mut self,
        channel: &str,
        message: PusherMessage,
        except: Option<&SocketId>,
        app_id: &str,
    ) -> Result<()>;

    async fn get_channel_members(
        &mut self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashMap<String, PresenceMemberInfo>>;

    async fn get_channel_sockets(&mut self, app_id: &str, channel: &str) -> Result<Vec<SocketId>>;

    async fn get_channel_socket_count(&mut self, app_id: &str, channel: &str) -> usize;

    async fn add_to_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<bool>;

    async fn remove_from_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<bool>;

    async fn remove_channel(&mut self, app_id: &str, channel: &str);

    async fn is_in_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<bool>;

    async fn add_presence_member(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
        member: PresenceMemberInfo,
    );

    async fn remove_presence_member(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Option<PresenceMemberInfo>;

    async fn get_presence_member(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Option<PresenceMemberInfo>;

    /// Remaining connections of one user in a presence channel; drives the
    /// first-join/last-leave rule for member events.
    async fn count_user_connections_in_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        user_id: &str,
    ) -> usize;

    async fn add_user(&mut self, app_id: &str, user_id: &str, socket_id: &SocketId) -> Result<()>;

    async fn remove_user(&mut self, app_id: &str, user_id: &str, socket_id: &SocketId)
    -> Result<()>;

    async fn get_user_sockets(&mut self, user_id: &str, app_id: &str) -> Result<Vec<WebSocketRef>>;

    async fn terminate_user_connections(&mut self, app_id: &str, user_id: &str) -> Result<()>;

    /// Connection count for one app on this node; drives the capacity check.
    async fn get_sockets_count(&self, app_id: &str) -> Result<usize>;

    async fn get_channels_with_socket_count(
        &mut self,
        app_id: &str,
    ) -> Result<HashMap<String, usize>>;

    /// All namespaces on this node, for shutdown drains and the control
    /// socket's app-agnostic broadcasts.
    async fn get_namespaces(&mut self) -> Result<Vec<Arc<Namespace>>>;

    async fn check_health(&self) -> Result<()>;
}

use crate::adapter::ConnectionManager;
use crate::channel::PresenceMemberInfo;
use crate::error::{Error, Result};

use crate::namespace::Namespace;
use crate::protocol::messages::PusherMessage;
use crate::websocket::{SocketId, WebSocketRef};
use async_trait::async_trait;
use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct LocalAdapter {
    pub namespaces: DashMap<String, Arc<Namespace>>,
    pub buffer_multiplier_per_cpu: usize,
    pub max_concurrent: usize,
    // Global semaphore to limit total concurrent broadcast operations across all channels
    broadcast_semaphore: Arc<Semaphore>,
}

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAdapter {
    pub fn new() -> Self {
        // Default: 128 concurrent ops per CPU, best results during testing on varied hardware
        Self::new_with_buffer_multiplier(128)
    }

    pub fn new_with_buffer_multiplier(multiplier: usize) -> Self {
        let cpu_cores = num_cpus::get();
        let max_concurrent = cpu_cores * multiplier;

        info!(
            "LocalAdapter initialized with {} CPU cores, buffer multiplier {}, max concurrent {}",
            cpu_cores, multiplier, max_concurrent
        );

        Self {
            namespaces: DashMap::new(),
            buffer_multiplier_per_cpu: multiplier,
            max_concurrent,
            broadcast_semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Send one pre-serialised frame to many sockets with
    /// semaphore-controlled concurrency, chunked so a huge channel cannot
    /// starve other broadcasts.
    async fn send_messages_concurrent(
        &self,
        target_socket_refs: Vec<WebSocketRef>,
        frame: Utf8Bytes,
    ) -> Vec<Result<()>> {
        use futures::stream::{self, StreamExt};

        let socket_count = target_socket_refs.len();
        if socket_count == 0 {
            return Vec::new();
        }

        // Determine target number of chunks (1-8 based on socket count vs max concurrency)
        let target_chunks = socket_count.div_ceil(self.max_concurrent).clamp(1, 8);
        let socket_chunk_size = (socket_count / target_chunks)
            .min(self.max_concurrent)
            .max(1);

        let mut results = Vec::with_capacity(socket_count);

        for socket_chunk in target_socket_refs.chunks(socket_chunk_size) {
            let chunk_size = socket_chunk.len();

            match self
                .broadcast_semaphore
                .acquire_many(chunk_size as u32)
                .await
            {
                Ok(_permits) => {
                    let chunk_vec: Vec<_> = socket_chunk.to_vec();
                    let chunk_results: Vec<Result<()>> = stream::iter(chunk_vec)
                        .map(|socket_ref| {
                            let frame = frame.clone();
                            async move { socket_ref.send_broadcast(frame) }
                        })
                        .buffer_unordered(chunk_size)
                        .collect()
                        .await;

                    results.extend(chunk_results);
                }
                Err(_) => {
                    for _ in 0..chunk_size {
                        results.push(Err(Error::Connection(
                            "Broadcast semaphore unavailable".to_string(),
                        )));
                    }
                }
            }
        }

        results
    }

    fn get_or_create_namespace(&self, app_id: &str) -> Arc<Namespace> {
        self.namespaces
            .entry(app_id.to_string())
            .or_insert_with(|| Arc::new(Namespace::new(app_id.to_string())))
            .clone()
    }
}

#[async_trait]
impl ConnectionManager for LocalAdapter {
    async fn init(&mut self) {
        info!("Initializing local adapter");
    }

    async fn get_namespace(&mut self, app_id: &str) -> Option<Arc<Namespace>> {
        Some(self.get_or_create_namespace(app_id))
    }

    async fn add_socket(&mut self, ws: WebSocketRef, app_id: &str) -> Result<()> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.add_socket(ws);
        Ok(())
    }

    async fn get_connection(&mut self, socket_id: &SocketId, app_id: &str) -> Option<WebSocketRef> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.get_connection(socket_id)
    }

    async fn remove_connection(&mut self, socket_id: &SocketId, app_id: &str) -> Result<()> {
        if let Some(namespace) = self.namespaces.get(app_id) {
            namespace.remove_connection(socket_id);
            Ok(())
        } else {
            Err(Error::Connection("Namespace not found".to_string()))
        }
    }

    async fn send_message(
        &mut self,
        app_id: &str,
        socket_id: &SocketId,
        message: PusherMessage,
    ) -> Result<()> {
        let connection = self
            .get_connection(socket_id, app_id)
            .await
            .ok_or_else(|| Error::Connection("Connection not found".to_string()))?;

        connection.send_message(&message).await
    }

    async fn send(
        &mut self,
        channel: &str,
        message: PusherMessage,
        except: Option<&SocketId>,
        app_id: &str,
    ) -> Result<()> {
        debug!("Sending message to channel: {}", channel);

        // Serialize message once to avoid repeated serialization overhead
        let serialized = serde_json::to_string(&message)
            .map_err(|e| Error::InvalidMessageFormat(format!("Serialization failed: {e}")))?;
        let frame = Utf8Bytes::from(serialized);

        let namespace = self.get_or_create_namespace(app_id);
        let target_socket_refs = namespace.get_channel_socket_refs_except(channel, except);

        let results = self
            .send_messages_concurrent(target_socket_refs, frame)
            .await;

        for send_result in results {
            if let Err(e) = send_result {
                match &e {
                    Error::ConnectionClosed(_) => {
                        debug!("Failed to send message to closed connection: {}", e);
                    }
                    _ => {
                        warn!("Failed to send message: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn get_channel_members(
        &mut self,
        app_id: &str,
        channel: &str,
    ) -> Result<HashMap<String, PresenceMemberInfo>> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.get_channel_members(channel))
    }

    async fn get_channel_sockets(&mut self, app_id: &str, channel: &str) -> Result<Vec<SocketId>> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.get_channel_sockets(channel))
    }

    async fn get_channel_socket_count(&mut self, app_id: &str, channel: &str) -> usize {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.channel_socket_count(channel)
    }

    async fn add_to_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<bool> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.add_channel_to_socket(channel, socket_id))
    }

    async fn remove_from_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<bool> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.remove_channel_from_socket(channel, socket_id))
    }

    async fn remove_channel(&mut self, app_id: &str, channel: &str) {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.remove_channel(channel);
    }

    async fn is_in_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<bool> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.is_in_channel(channel, socket_id))
    }

    async fn add_presence_member(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
        member: PresenceMemberInfo,
    ) {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.add_presence_member(channel, socket_id, member);
    }

    async fn remove_presence_member(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Option<PresenceMemberInfo> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.remove_presence_member(channel, socket_id)
    }

    async fn get_presence_member(
        &mut self,
        app_id: &str,
        channel: &str,
        socket_id: &SocketId,
    ) -> Option<PresenceMemberInfo> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.get_presence_member(channel, socket_id)
    }

    async fn count_user_connections_in_channel(
        &mut self,
        app_id: &str,
        channel: &str,
        user_id: &str,
    ) -> usize {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.presence_connection_count(channel, user_id)
    }

    async fn add_user(&mut self, app_id: &str, user_id: &str, socket_id: &SocketId) -> Result<()> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.add_user(user_id, socket_id);
        Ok(())
    }

    async fn remove_user(
        &mut self,
        app_id: &str,
        user_id: &str,
        socket_id: &SocketId,
    ) -> Result<()> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.remove_user(user_id, socket_id);
        Ok(())
    }

    async fn get_user_sockets(&mut self, user_id: &str, app_id: &str) -> Result<Vec<WebSocketRef>> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.get_user_sockets(user_id))
    }

    async fn terminate_user_connections(&mut self, app_id: &str, user_id: &str) -> Result<()> {
        let namespace = self.get_or_create_namespace(app_id);
        namespace.terminate_user_connections(user_id).await
    }

    async fn get_sockets_count(&self, app_id: &str) -> Result<usize> {
        if let Some(namespace) = self.namespaces.get(app_id) {
            Ok(namespace.sockets_count())
        } else {
            Ok(0) // No namespace means no sockets
        }
    }

    async fn get_channels_with_socket_count(
        &mut self,
        app_id: &str,
    ) -> Result<HashMap<String, usize>> {
        let namespace = self.get_or_create_namespace(app_id);
        Ok(namespace.get_channels_with_socket_count())
    }

    async fn get_namespaces(&mut self) -> Result<Vec<Arc<Namespace>>> {
        Ok(self.namespaces.iter().map(|e| e.value().clone()).collect())
    }

    async fn check_health(&self) -> Result<()> {
        // Local adapter is always healthy since it's in-memory
        Ok(())
    }
}

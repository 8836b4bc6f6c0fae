use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use threads_types::events::GatewayEvent;

struct ConnectionHandle {
    user_id: i64,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Tracks connected sockets and their conversation rooms.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> owning user and outbound queue
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,

    /// conversation_id -> joined conn_ids
    rooms: RwLock<HashMap<i64, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: i64) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, ConnectionHandle { user_id, tx });
        (conn_id, rx)
    }

    /// Drop a connection and every room membership it held.
    pub async fn unregister(&self, conn_id: Uuid) {
        {
            let mut rooms = self.inner.rooms.write().await;
            rooms.retain(|_, members| {
                members.remove(&conn_id);
                !members.is_empty()
            });
        }
        self.inner.connections.write().await.remove(&conn_id);
    }

    pub async fn join_room(&self, conn_id: Uuid, conversation_id: i64) {
        self.inner
            .rooms
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(conn_id);
    }

    pub async fn leave_room(&self, conn_id: Uuid, conversation_id: i64) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    /// Number of connections currently in a room.
    #[cfg(test)]
    pub async fn room_size(&self, conversation_id: i64) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    /// Emit to every connection in the room. Returns how many were reached.
    pub async fn emit_to_room(&self, conversation_id: i64, event: GatewayEvent) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(&conversation_id) else {
            return 0;
        };

        let connections = self.inner.connections.read().await;
        members
            .iter()
            .filter_map(|conn_id| connections.get(conn_id))
            .filter(|handle| handle.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Send to every live connection of a user. Returns how many were reached.
    pub async fn send_to_user(&self, user_id: i64, event: GatewayEvent) -> usize {
        let connections = self.inner.connections.read().await;
        connections
            .values()
            .filter(|handle| handle.user_id == user_id)
            .filter(|handle| handle.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Reply to one specific connection.
    pub async fn send_to_connection(&self, conn_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(handle) = connections.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// Distinct users with at least one open connection.
    #[cfg(test)]
    pub async fn online_users(&self) -> Vec<i64> {
        let connections = self.inner.connections.read().await;
        let mut users: Vec<i64> = connections.values().map(|h| h.user_id).collect();
        users.sort_unstable();
        users.dedup();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> GatewayEvent {
        GatewayEvent::error("ping")
    }

    #[tokio::test]
    async fn room_emit_reaches_only_members() {
        let dispatcher = Dispatcher::new();
        let (a, mut rx_a) = dispatcher.register(1).await;
        let (b, mut rx_b) = dispatcher.register(2).await;
        let (_c, mut rx_c) = dispatcher.register(3).await;

        dispatcher.join_room(a, 10).await;
        dispatcher.join_room(b, 10).await;

        assert_eq!(dispatcher.emit_to_room(10, ping()).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());

        assert_eq!(dispatcher.emit_to_room(11, ping()).await, 0);
    }

    #[tokio::test]
    async fn leaving_and_unregistering_clean_up_rooms() {
        let dispatcher = Dispatcher::new();
        let (a, _rx_a) = dispatcher.register(1).await;
        let (b, _rx_b) = dispatcher.register(2).await;
        dispatcher.join_room(a, 10).await;
        dispatcher.join_room(b, 10).await;
        dispatcher.join_room(a, 20).await;

        dispatcher.leave_room(b, 10).await;
        assert_eq!(dispatcher.room_size(10).await, 1);

        dispatcher.unregister(a).await;
        assert_eq!(dispatcher.room_size(10).await, 0);
        assert_eq!(dispatcher.room_size(20).await, 0);
        assert_eq!(dispatcher.online_users().await, vec![2]);
    }

    #[tokio::test]
    async fn user_delivery_fans_out_to_every_tab() {
        let dispatcher = Dispatcher::new();
        let (_first, mut rx_first) = dispatcher.register(7).await;
        let (_second, mut rx_second) = dispatcher.register(7).await;

        assert_eq!(dispatcher.send_to_user(7, ping()).await, 2);
        assert!(rx_first.try_recv().is_ok());
        assert!(rx_second.try_recv().is_ok());
        assert_eq!(dispatcher.send_to_user(8, ping()).await, 0);
    }
}

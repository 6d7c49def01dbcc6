//! Multi-session target routing.
//!
//! vscode-js-debug announces each debuggee target with a `startDebugging`
//! reverse request carrying a `__pendingTargetId`. Every claimed target
//! gets its own TCP connection with an independent sequence counter and
//! pending table; thread- and frame-scoped requests are then routed to the
//! active child instead of the primary connection.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::DapConnection;

/// One claimed debuggee target.
pub struct ChildSession {
    /// The `__pendingTargetId` assigned by the parent adapter.
    pub target_id: String,
    /// The child's dedicated connection.
    pub conn: Arc<DapConnection>,
}

/// Tracks child sessions and which one currently receives routed requests.
#[derive(Default)]
pub struct SessionRouter {
    children: Mutex<Vec<ChildSession>>,
    active: Mutex<Option<String>>,
}

impl SessionRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a child session, optionally making it the active target.
    pub async fn add(&self, child: ChildSession, make_active: bool) {
        let target_id = child.target_id.clone();
        {
            let mut children = self.children.lock().await;
            children.retain(|c| c.target_id != target_id);
            children.push(child);
        }
        if make_active {
            *self.active.lock().await = Some(target_id);
        }
    }

    /// Remove a child session. Clears the active pointer if it referred to
    /// the removed child.
    pub async fn remove(&self, target_id: &str) {
        self.children
            .lock()
            .await
            .retain(|c| c.target_id != target_id);
        let mut active = self.active.lock().await;
        if active.as_deref() == Some(target_id) {
            *active = None;
        }
    }

    /// The connection of the active child session, if any.
    pub async fn active_conn(&self) -> Option<Arc<DapConnection>> {
        let active = self.active.lock().await.clone()?;
        let children = self.children.lock().await;
        children
            .iter()
            .find(|c| c.target_id == active)
            .map(|c| c.conn.clone())
    }

    /// The active target id, if any.
    pub async fn active_target(&self) -> Option<String> {
        self.active.lock().await.clone()
    }

    /// Number of registered children.
    pub async fn child_count(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split};

    fn fake_conn() -> Arc<DapConnection> {
        let (ours, _theirs) = duplex(1024);
        let (r, w) = split(ours);
        Arc::new(DapConnection::new(r, w))
    }

    #[tokio::test]
    async fn router_starts_empty() {
        let router = SessionRouter::new();
        assert_eq!(router.child_count().await, 0);
        assert!(router.active_conn().await.is_none());
        assert!(router.active_target().await.is_none());
    }

    #[tokio::test]
    async fn router_add_makes_active() {
        let router = SessionRouter::new();
        router
            .add(
                ChildSession {
                    target_id: "t1".into(),
                    conn: fake_conn(),
                },
                true,
            )
            .await;

        assert_eq!(router.child_count().await, 1);
        assert_eq!(router.active_target().await.as_deref(), Some("t1"));
        assert!(router.active_conn().await.is_some());
    }

    #[tokio::test]
    async fn router_add_without_activation_keeps_previous() {
        let router = SessionRouter::new();
        router
            .add(
                ChildSession {
                    target_id: "t1".into(),
                    conn: fake_conn(),
                },
                true,
            )
            .await;
        router
            .add(
                ChildSession {
                    target_id: "t2".into(),
                    conn: fake_conn(),
                },
                false,
            )
            .await;

        assert_eq!(router.child_count().await, 2);
        assert_eq!(router.active_target().await.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn router_remove_active_clears_pointer() {
        let router = SessionRouter::new();
        router
            .add(
                ChildSession {
                    target_id: "t1".into(),
                    conn: fake_conn(),
                },
                true,
            )
            .await;
        router.remove("t1").await;

        assert_eq!(router.child_count().await, 0);
        assert!(router.active_target().await.is_none());
        assert!(router.active_conn().await.is_none());
    }

    #[tokio::test]
    async fn router_remove_inactive_keeps_active() {
        let router = SessionRouter::new();
        router
            .add(
                ChildSession {
                    target_id: "t1".into(),
                    conn: fake_conn(),
                },
                true,
            )
            .await;
        router
            .add(
                ChildSession {
                    target_id: "t2".into(),
                    conn: fake_conn(),
                },
                false,
            )
            .await;
        router.remove("t2").await;

        assert_eq!(router.active_target().await.as_deref(), Some("t1"));
        assert_eq!(router.child_count().await, 1);
    }

    #[tokio::test]
    async fn router_readd_same_target_replaces() {
        let router = SessionRouter::new();
        router
            .add(
                ChildSession {
                    target_id: "t1".into(),
                    conn: fake_conn(),
                },
                true,
            )
            .await;
        router
            .add(
                ChildSession {
                    target_id: "t1".into(),
                    conn: fake_conn(),
                },
                true,
            )
            .await;
        assert_eq!(router.child_count().await, 1);
    }
}

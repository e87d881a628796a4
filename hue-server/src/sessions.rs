use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use hue_core::{Session, SessionStatus};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type SessionSlot = Arc<Mutex<Session>>;

#[derive(Default)]
struct Inner {
    slots: HashMap<Uuid, SessionSlot>,
    order: VecDeque<Uuid>,
}

impl Inner {
    fn is_evictable(&self, id: &Uuid) -> bool {
        self.slots.get(id).is_some_and(|slot| {
            slot.try_lock()
                .is_ok_and(|session| session.status() != SessionStatus::Generating)
        })
    }
}

/// In-memory sessions keyed by id.
///
/// Beyond `capacity` the oldest session that is not generating is dropped. When every session is
/// busy the registry grows past capacity until one of them becomes evictable.
pub struct SessionRegistry {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::default(),
        }
    }

    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner.slots.insert(id, Arc::new(Mutex::new(Session::new())));
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            let victim = inner
                .order
                .iter()
                .position(|other| *other != id && inner.is_evictable(other));
            let Some(pos) = victim else {
                tracing::warn!(sessions = inner.order.len(), "every session is busy, none evicted");
                break;
            };
            if let Some(evicted) = inner.order.remove(pos) {
                inner.slots.remove(&evicted);
                tracing::debug!(session = %evicted, "session evicted");
            }
        }
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionSlot> {
        self.inner.read().await.slots.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.slots.len()
    }
}

//! Session-scoped notification store.
//!
//! Observer pattern with an explicit subscriber list and unsubscribe
//! tokens — no ambient emitters, so listener lifecycle is testable and
//! nothing leaks past component teardown. Notifications live exactly as
//! long as the store; the durable notification API is a separate
//! collaborator.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A delivered notification. State machine: `unread -> read` (one-way), or
/// `(any) -> removed` (terminal). Nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Input for [`NotificationStore::add_notification`]; id and creation time
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub user_id: String,
    pub ride_id: Option<String>,
}

type Listener = Arc<dyn Fn(&[Notification]) + Send + Sync>;
type DesktopHook = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct Inner {
    notifications: Vec<Notification>,
    subscribers: Vec<(u64, Listener)>,
    next_token: u64,
    desktop_hook: Option<DesktopHook>,
}

/// Handle returned by [`NotificationStore::subscribe`]. Dropping it does
/// nothing; call [`Subscription::unsubscribe`] to stop receiving updates.
pub struct Subscription {
    token: u64,
    inner: Arc<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .retain(|(token, _)| *token != self.token);
    }
}

/// In-memory, most-recent-first notification list with synchronous fan-out
/// to subscribers.
#[derive(Clone, Default)]
pub struct NotificationStore {
    inner: Arc<Mutex<Inner>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a best-effort hook invoked once per added notification,
    /// standing in for the platform's native notification surface. Only
    /// install it once the user has granted notification permission.
    pub fn set_desktop_hook(&self, hook: impl Fn(&Notification) + Send + Sync + 'static) {
        self.inner.lock().unwrap().desktop_hook = Some(Arc::new(hook));
    }

    /// Add a notification: assigns a unique id and creation time, prepends
    /// it, and synchronously notifies every subscriber. Returns the id.
    pub fn add_notification(&self, data: NewNotification) -> String {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            title: data.title,
            message: data.message,
            severity: data.severity,
            user_id: data.user_id,
            ride_id: data.ride_id,
            created_at: Utc::now(),
            read: false,
        };
        let id = notification.id.clone();

        let hook = {
            let mut inner = self.inner.lock().unwrap();
            inner.notifications.insert(0, notification.clone());
            inner.desktop_hook.clone()
        };
        if let Some(hook) = hook {
            hook(&notification);
        }
        self.notify_subscribers();
        id
    }

    /// Register a subscriber; it is immediately eligible for every
    /// subsequent change. Multiple independent subscribers are supported.
    pub fn subscribe(&self, callback: impl Fn(&[Notification]) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.push((token, Arc::new(callback)));
        Subscription {
            token,
            inner: self.inner.clone(),
        }
    }

    /// Mark one notification read. Idempotent; unknown ids are ignored.
    pub fn mark_as_read(&self, id: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.notifications.iter_mut().find(|n| n.id == id) {
                Some(notification) if !notification.read => notification.read = true,
                _ => return,
            }
        }
        self.notify_subscribers();
    }

    pub fn mark_all_as_read(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            for notification in &mut inner.notifications {
                notification.read = true;
            }
        }
        self.notify_subscribers();
    }

    pub fn remove_notification(&self, id: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.notifications.len();
            inner.notifications.retain(|n| n.id != id);
            if inner.notifications.len() == before {
                return;
            }
        }
        self.notify_subscribers();
    }

    pub fn clear_all(&self) {
        self.inner.lock().unwrap().notifications.clear();
        self.notify_subscribers();
    }

    /// Snapshot of the current list, most recent first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .iter()
            .filter(|n| !n.read)
            .count()
    }

    /// Call every subscriber with a snapshot. The lock is released first so
    /// a callback may read (or mutate) the store without deadlocking.
    fn notify_subscribers(&self) {
        let (snapshot, subscribers) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.notifications.clone(),
                inner
                    .subscribers
                    .iter()
                    .map(|(_, listener)| listener.clone())
                    .collect::<Vec<_>>(),
            )
        };
        for listener in subscribers {
            listener(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info(title: &str) -> NewNotification {
        NewNotification {
            title: title.into(),
            message: "msg".into(),
            severity: Severity::Info,
            user_id: "U1".into(),
            ride_id: None,
        }
    }

    #[test]
    fn add_increments_unread_and_prepends() {
        let store = NotificationStore::new();
        store.add_notification(info("first"));
        store.add_notification(info("second"));

        assert_eq!(store.unread_count(), 2);
        let list = store.notifications();
        assert_eq!(list[0].title, "second", "most recent first");
        assert_ne!(list[0].id, list[1].id, "ids are unique within a session");
    }

    #[test]
    fn mark_as_read_is_one_way_and_idempotent() {
        let store = NotificationStore::new();
        let id = store.add_notification(info("n"));

        store.mark_as_read(&id);
        assert_eq!(store.unread_count(), 0);
        store.mark_as_read(&id);
        assert_eq!(store.unread_count(), 0, "second mark must not underflow");
    }

    #[test]
    fn mark_all_then_clear() {
        let store = NotificationStore::new();
        store.add_notification(info("a"));
        store.add_notification(info("b"));

        store.mark_all_as_read();
        assert_eq!(store.unread_count(), 0);

        store.clear_all();
        assert!(store.notifications().is_empty());
    }

    #[test]
    fn remove_targets_one_notification() {
        let store = NotificationStore::new();
        let id = store.add_notification(info("gone"));
        store.add_notification(info("stays"));

        store.remove_notification(&id);
        let list = store.notifications();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "stays");
    }

    #[test]
    fn subscribers_fire_synchronously_until_unsubscribed() {
        let store = NotificationStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = calls.clone();
        let subscription = store.subscribe(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        store.add_notification(info("one"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        store.add_notification(info("two"));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "unsubscribed listener fired");
    }

    #[test]
    fn independent_subscribers_fan_out() {
        let store = NotificationStore::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let a = first.clone();
        let _sub_a = store.subscribe(move |list| {
            a.fetch_add(list.len(), Ordering::SeqCst);
        });
        let b = second.clone();
        let _sub_b = store.subscribe(move |list| {
            b.fetch_add(list.len(), Ordering::SeqCst);
        });

        store.add_notification(info("n"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn desktop_hook_sees_each_added_notification() {
        let store = NotificationStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        store.set_desktop_hook(move |notification| {
            sink.lock().unwrap().push(notification.title.clone());
        });

        store.add_notification(info("ping"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["ping".to_string()]);
    }

    #[test]
    fn callback_may_read_store_without_deadlock() {
        let store = NotificationStore::new();
        let observed = Arc::new(AtomicUsize::new(0));

        let inner_store = store.clone();
        let observed_in_cb = observed.clone();
        let _sub = store.subscribe(move |_| {
            observed_in_cb.store(inner_store.unread_count(), Ordering::SeqCst);
        });

        store.add_notification(info("n"));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}

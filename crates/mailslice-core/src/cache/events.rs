//! Change notifications for live views of a folder.
//!
//! A view subscribes with the date window it shows. Mutations are delivered
//! only to subscribers whose window contains the affected message's date;
//! status changes go to everyone.

use chrono::{DateTime, Utc};
use mailslice_imap::Uid;
use tokio::sync::mpsc;

use super::model::{DateWindow, HeaderInfo, SliceStatus};

/// Identifies one subscription on a folder cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change a live view should apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Headers newly stored.
    HeadersAdded(Vec<HeaderInfo>),
    /// Stored headers whose metadata changed.
    HeadersUpdated(Vec<HeaderInfo>),
    /// Headers removed because the server no longer has them.
    HeadersRemoved(Vec<Uid>),
    /// Sync status of the folder.
    StatusChanged(SliceStatus),
}

/// The receiving end of a subscription.
#[derive(Debug)]
pub struct CacheSubscription {
    /// Subscription id, for [`super::FolderCache::set_window`] and
    /// [`super::FolderCache::unsubscribe`].
    pub id: SubscriptionId,
    /// Event stream.
    pub events: mpsc::UnboundedReceiver<CacheEvent>,
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    window: DateWindow,
    tx: mpsc::UnboundedSender<CacheEvent>,
}

/// Subscribers of one folder cache.
#[derive(Debug, Default)]
pub struct Subscribers {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl Subscribers {
    /// Registers a window.
    pub fn subscribe(&mut self, window: DateWindow) -> CacheSubscription {
        let (tx, events) = mpsc::unbounded_channel();
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, window, tx });
        CacheSubscription { id, events }
    }

    /// Moves a subscriber's window. Returns false for an unknown id.
    pub fn set_window(&mut self, id: SubscriptionId, window: DateWindow) -> bool {
        let Some(subscriber) = self.subscribers.iter_mut().find(|s| s.id == id) else {
            return false;
        };
        subscriber.window = window;
        true
    }

    /// Drops a subscriber.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|s| s.id != id);
    }

    /// Windows of every live subscriber.
    #[must_use]
    pub fn windows(&self) -> Vec<DateWindow> {
        self.subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .map(|s| s.window)
            .collect()
    }

    /// Number of live subscribers.
    #[cfg(test)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }

    /// Returns true if nobody is subscribed.
    #[cfg(test)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends an event about a message dated `date`.
    pub fn notify(&mut self, date: DateTime<Utc>, event: &CacheEvent) {
        self.send_where(|s| s.window.contains(date), event);
    }

    /// Sends an event to every subscriber.
    pub fn broadcast(&mut self, event: &CacheEvent) {
        self.send_where(|_| true, event);
    }

    /// Sends an event to one subscriber.
    pub fn send_to(&mut self, id: SubscriptionId, event: &CacheEvent) {
        self.send_where(|s| s.id == id, event);
    }

    fn send_where(&mut self, wanted: impl Fn(&Subscriber) -> bool, event: &CacheEvent) {
        // A failed send means the receiver is gone.
        self.subscribers
            .retain(|s| !wanted(s) || s.tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + TimeDelta::hours(hours)
    }

    #[test]
    fn notifications_follow_windows() {
        let mut subs = Subscribers::default();
        let mut recent = subs.subscribe(DateWindow::new(at(100), at(50)));
        let mut old = subs.subscribe(DateWindow::new(at(49), at(0)));

        let removed = CacheEvent::HeadersRemoved(vec![Uid::new(1).unwrap()]);
        subs.notify(at(60), &removed);
        assert_eq!(recent.events.try_recv().unwrap(), removed);
        assert!(old.events.try_recv().is_err());

        assert!(subs.set_window(old.id, DateWindow::new(at(70), at(0))));
        subs.notify(at(60), &removed);
        assert!(old.events.try_recv().is_ok());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut subs = Subscribers::default();
        let kept = subs.subscribe(DateWindow::new(at(10), at(0)));
        let gone = subs.subscribe(DateWindow::new(at(10), at(0)));
        drop(gone);

        subs.broadcast(&CacheEvent::StatusChanged(SliceStatus::Synced));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.windows().len(), 1);

        subs.unsubscribe(kept.id);
        assert!(subs.is_empty());
        assert!(!subs.set_window(kept.id, DateWindow::new(at(1), at(0))));
    }

    #[test]
    fn send_to_targets_one_subscriber() {
        let mut subs = Subscribers::default();
        let mut a = subs.subscribe(DateWindow::new(at(10), at(0)));
        let mut b = subs.subscribe(DateWindow::new(at(10), at(0)));

        subs.send_to(b.id, &CacheEvent::StatusChanged(SliceStatus::Synchronizing));
        assert!(a.events.try_recv().is_err());
        assert_eq!(
            b.events.try_recv().unwrap(),
            CacheEvent::StatusChanged(SliceStatus::Synchronizing)
        );
    }
}

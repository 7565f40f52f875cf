//! Named fan-in for asynchronous results.
//!
//! An [`Aggregator`] is created with a fixed list of names. Each name gets a
//! [`Slot`] that may be fired exactly once; when every slot has fired, the
//! completion callback receives an [`Aggregate`] holding one value per name.
//!
//! Firing a slot a second time is a logic defect upstream, so it is reported
//! as [`Error::Fault`] and logged, never ignored. There is no timeout: a slot
//! that is never fired leaves the join pending forever.
//!
//! # Example
//!
//! ```
//! use mailslice_core::{Aggregate, Aggregator};
//!
//! let aggregator = Aggregator::new(["search", "db"], |results: Aggregate<u32>| {
//!     assert_eq!(results.get("search"), Some(&1));
//!     assert_eq!(results.get("db"), Some(&2));
//! })?;
//! let search = aggregator.slot("search")?;
//! let db = aggregator.slot("db")?;
//!
//! db.fire(2)?;
//! search.fire(1)?;
//! assert!(search.fire(3).is_err());
//! # Ok::<(), mailslice_core::Error>(())
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::{Error, Result};

type Completion<T> = Box<dyn FnOnce(Aggregate<T>) + Send>;

struct Shared<T> {
    names: Vec<String>,
    cells: Vec<Option<T>>,
    // Stays set after completion moves the values out.
    fired: Vec<bool>,
    remaining: usize,
    on_complete: Option<Completion<T>>,
}

/// Joins a fixed set of named results into one completion.
pub struct Aggregator<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T: Send + 'static> Aggregator<T> {
    /// Creates an aggregator that calls `on_complete` once every name has
    /// reported.
    ///
    /// An empty name list completes immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if a name is listed twice.
    pub fn new<I, S, F>(names: I, on_complete: F) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Aggregate<T>) + Send + 'static,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(Error::Fault(format!("aggregator name '{name}' listed twice")));
            }
        }

        let cells = names.iter().map(|_| None).collect();
        let fired = vec![false; names.len()];
        let remaining = names.len();
        let aggregator = Self {
            shared: Arc::new(Mutex::new(Shared {
                names,
                cells,
                fired,
                remaining,
                on_complete: Some(Box::new(on_complete)),
            })),
        };

        if remaining == 0 {
            let done = {
                let mut shared = aggregator.lock();
                shared.on_complete.take().map(|f| (f, Aggregate::collect(&mut shared)))
            };
            if let Some((f, aggregate)) = done {
                f(aggregate);
            }
        }
        Ok(aggregator)
    }

    /// Creates an aggregator whose completion is delivered through a channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if a name is listed twice.
    pub fn join<I, S>(names: I) -> Result<(Self, oneshot::Receiver<Aggregate<T>>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = oneshot::channel();
        let aggregator = Self::new(names, move |aggregate| {
            // The receiver may have been dropped; nobody is waiting then.
            let _ = tx.send(aggregate);
        })?;
        Ok((aggregator, rx))
    }

    /// Returns the result-setter for a name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if the name was not declared upfront.
    pub fn slot(&self, name: &str) -> Result<Slot<T>> {
        let index = self
            .lock()
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| Error::Fault(format!("aggregator has no slot named '{name}'")))?;
        Ok(Slot {
            index,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of slots that have not fired yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().remaining
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-use result setter for one aggregator name.
///
/// Slots are cheap to clone so they can be moved into separate tasks; every
/// clone shares the same once-only cell.
pub struct Slot<T> {
    index: usize,
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("index", &self.index).finish_non_exhaustive()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Slot<T> {
    /// Delivers this name's result.
    ///
    /// If it was the last outstanding name, the completion runs before this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] if this name already reported.
    pub fn fire(&self, value: T) -> Result<()> {
        let done = {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            if shared.fired[self.index] {
                let name = &shared.names[self.index];
                tracing::error!(slot = %name, "aggregator callback fired multiple times");
                return Err(Error::Fault(format!("callback '{name}' fired multiple times")));
            }
            shared.fired[self.index] = true;
            shared.cells[self.index] = Some(value);
            shared.remaining -= 1;
            if shared.remaining == 0 {
                shared
                    .on_complete
                    .take()
                    .map(|f| (f, Aggregate::collect(&mut shared)))
            } else {
                None
            }
        };

        if let Some((f, aggregate)) = done {
            f(aggregate);
        }
        Ok(())
    }

    /// The name this slot reports for.
    #[must_use]
    pub fn name(&self) -> String {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner).names[self.index].clone()
    }
}

/// The joined results, keyed by the names given upfront.
#[derive(Debug)]
pub struct Aggregate<T> {
    entries: Vec<(String, T)>,
}

impl<T> Aggregate<T> {
    fn collect(shared: &mut Shared<T>) -> Self {
        let entries = shared
            .names
            .iter()
            .zip(shared.cells.iter_mut())
            .filter_map(|(name, cell)| cell.take().map(|v| (name.clone(), v)))
            .collect();
        Self { entries }
    }

    /// Returns the result for a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Removes and returns the result for a name.
    pub fn take(&mut self, name: &str) -> Option<T> {
        let index = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the aggregate holds no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn completes_once_with_all_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (calls2, seen2) = (Arc::clone(&calls), Arc::clone(&seen));

        let aggregator = Aggregator::new(["a", "b", "c"], move |agg: Aggregate<u32>| {
            calls2.fetch_add(1, Ordering::SeqCst);
            *seen2.lock().unwrap() = agg.names().map(String::from).collect::<Vec<_>>();
            assert_eq!(agg.get("a"), Some(&1));
            assert_eq!(agg.get("b"), Some(&2));
            assert_eq!(agg.get("c"), Some(&3));
        })
        .unwrap();

        aggregator.slot("c").unwrap().fire(3).unwrap();
        aggregator.slot("a").unwrap().fire(1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(aggregator.pending(), 1);
        aggregator.slot("b").unwrap().fire(2).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn double_fire_is_a_fault() {
        let aggregator = Aggregator::new(["search", "db"], |_: Aggregate<u8>| {}).unwrap();
        let search = aggregator.slot("search").unwrap();
        search.fire(1).unwrap();

        let err = search.clone().fire(2).unwrap_err();
        assert!(err.is_fault());
        assert_eq!(aggregator.pending(), 1);
    }

    #[test]
    fn double_fire_after_completion_is_a_fault() {
        let aggregator = Aggregator::new(["only"], |_: Aggregate<u8>| {}).unwrap();
        let only = aggregator.slot("only").unwrap();
        only.fire(1).unwrap();
        assert!(only.fire(1).unwrap_err().is_fault());
    }

    #[test]
    fn refire_after_join_completes_is_a_fault() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let aggregator = Aggregator::new(["a", "b"], move |_: Aggregate<u8>| {
            calls2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let a = aggregator.slot("a").unwrap();
        a.fire(1).unwrap();
        aggregator.slot("b").unwrap().fire(2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(a.fire(3).unwrap_err().is_fault());
        assert!(aggregator.slot("b").unwrap().fire(4).unwrap_err().is_fault());
        assert_eq!(aggregator.pending(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_and_duplicate_names() {
        let aggregator = Aggregator::new(["x"], |_: Aggregate<u8>| {}).unwrap();
        assert!(aggregator.slot("y").unwrap_err().is_fault());
        assert!(
            Aggregator::new(["x", "x"], |_: Aggregate<u8>| {})
                .err()
                .unwrap()
                .is_fault()
        );
    }

    #[test]
    fn empty_names_complete_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let _aggregator = Aggregator::new(Vec::<String>::new(), move |agg: Aggregate<u8>| {
            assert!(agg.is_empty());
            calls2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_across_tasks() {
        let (aggregator, done) = Aggregator::<String>::join(["left", "right"]).unwrap();
        let left = aggregator.slot("left").unwrap();
        let right = aggregator.slot("right").unwrap();

        let a = tokio::spawn(async move { right.fire("R".into()) });
        let b = tokio::spawn(async move { left.fire("L".into()) });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let mut agg = done.await.unwrap();
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.take("left").as_deref(), Some("L"));
        assert_eq!(agg.take("right").as_deref(), Some("R"));
        assert!(agg.take("left").is_none());
    }
}

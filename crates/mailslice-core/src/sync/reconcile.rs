//! Diffing server search results against cached headers.

use std::collections::HashMap;

use mailslice_imap::Uid;

use crate::cache::HeaderInfo;

/// What a sync pass has to do for one date range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Server ids the cache has never seen, in server order.
    pub new_ids: Vec<Uid>,
    /// Cached headers the server still has; their flags need a refresh.
    pub known: Vec<HeaderInfo>,
    /// Cached headers the server no longer reports.
    pub deleted: Vec<HeaderInfo>,
}

impl Reconciliation {
    /// Ids of the known headers.
    #[must_use]
    pub fn known_ids(&self) -> Vec<Uid> {
        self.known.iter().map(|h| h.id).collect()
    }

    /// Ids of the deleted headers.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<Uid> {
        self.deleted.iter().map(|h| h.id).collect()
    }
}

/// Splits the server's ids and the cached headers of the same range into
/// new, known and deleted.
///
/// Each server id is consumed by the first cached header that matches it;
/// whatever is left unconsumed is new.
#[must_use]
pub fn reconcile(server_ids: &[Uid], local: Vec<HeaderInfo>) -> Reconciliation {
    let mut remaining: Vec<Option<Uid>> = server_ids.iter().copied().map(Some).collect();
    let index: HashMap<Uid, usize> = server_ids
        .iter()
        .enumerate()
        .map(|(i, uid)| (*uid, i))
        .collect();

    let mut known = Vec::new();
    let mut deleted = Vec::new();
    for header in local {
        match index.get(&header.id) {
            Some(&i) => {
                remaining[i] = None;
                known.push(header);
            }
            None => deleted.push(header),
        }
    }

    Reconciliation {
        new_ids: remaining.into_iter().flatten().collect(),
        known,
        deleted,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn local(n: u32) -> HeaderInfo {
        HeaderInfo::new(uid(n), DateTime::<Utc>::UNIX_EPOCH)
    }

    #[test]
    fn splits_new_known_and_deleted() {
        let result = reconcile(&[uid(1), uid(3), uid(5)], vec![local(1), local(2), local(4)]);
        assert_eq!(result.deleted_ids(), vec![uid(2), uid(4)]);
        assert_eq!(result.new_ids, vec![uid(3), uid(5)]);
        assert_eq!(result.known_ids(), vec![uid(1)]);
    }

    #[test]
    fn empty_server_deletes_everything() {
        let result = reconcile(&[], vec![local(7), local(8)]);
        assert!(result.new_ids.is_empty());
        assert!(result.known.is_empty());
        assert_eq!(result.deleted.len(), 2);
    }

    #[test]
    fn empty_cache_makes_everything_new() {
        let result = reconcile(&[uid(9), uid(2)], Vec::new());
        assert_eq!(result.new_ids, vec![uid(9), uid(2)]);
        assert!(result.deleted.is_empty());
    }
}

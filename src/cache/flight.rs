//! Single-flight Module
//!
//! Coalesces concurrent loads of the same missing key onto one loader call.
//!
//! The first caller to register a key owns its ticket and must load it; later
//! callers get a clone of the same shared receiver and await the owner's
//! result. Tickets live only for the duration of one load.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::channel::oneshot;
use futures::future::{join_all, FutureExt, Shared};

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

type TicketResult<V> = Result<Arc<CacheEntry<V>>>;
type Ticket<V> = Shared<oneshot::Receiver<TicketResult<V>>>;

// == Flight Table ==
/// Keys currently being loaded synchronously, with the ticket waiters await.
pub(crate) struct FlightTable<K, V> {
    tickets: DashMap<K, Ticket<V>>,
}

impl<K, V> FlightTable<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new() -> Self {
        Self {
            tickets: DashMap::new(),
        }
    }

    /// Number of loads currently in flight.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Registers interest in `keys`.
    ///
    /// Each key is either claimed by this caller (no ticket existed) or joined
    /// onto the ticket another caller already holds.
    pub fn claim(&self, keys: impl IntoIterator<Item = K>) -> Claim<'_, K, V> {
        let mut owned = Vec::new();
        let mut waiting = Vec::new();

        for key in keys {
            match self.tickets.entry(key) {
                Entry::Occupied(ticket) => {
                    waiting.push((ticket.key().clone(), ticket.get().clone()));
                }
                Entry::Vacant(slot) => {
                    let (sender, receiver) = oneshot::channel();
                    let key = slot.key().clone();
                    slot.insert(receiver.shared());
                    owned.push((key, sender));
                }
            }
        }

        Claim {
            table: self,
            owned,
            waiting,
        }
    }
}

// == Claim ==
/// The keys one caller owns plus the tickets it waits on.
///
/// Dropping a claim without completing it removes its tickets, so waiters of
/// an abandoned load see [`CacheError::LoadAbandoned`] instead of hanging.
pub(crate) struct Claim<'a, K, V>
where
    K: Eq + Hash,
{
    table: &'a FlightTable<K, V>,
    owned: Vec<(K, oneshot::Sender<TicketResult<V>>)>,
    waiting: Vec<(K, Ticket<V>)>,
}

impl<K, V> Claim<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn owned_keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.owned.iter().map(|(key, _)| key)
    }

    pub fn owns_any(&self) -> bool {
        !self.owned.is_empty()
    }

    /// Hands each owned key its freshly stored entry.
    ///
    /// A ticket is removed from the table before its result is sent, so a
    /// later caller either sees the stored entry or starts a new load.
    pub fn complete(&mut self, entries: &HashMap<K, Arc<CacheEntry<V>>>) {
        for (key, sender) in self.owned.drain(..) {
            self.table.tickets.remove(&key);
            let result = entries
                .get(&key)
                .cloned()
                .ok_or_else(|| CacheError::Internal(format!("no entry loaded for {key:?}")));
            let _ = sender.send(result);
        }
    }

    /// Fails every owned key with the same error.
    pub fn fail(&mut self, error: &CacheError) {
        for (key, sender) in self.owned.drain(..) {
            self.table.tickets.remove(&key);
            let _ = sender.send(Err(error.clone()));
        }
    }

    /// Awaits the tickets owned by other callers.
    ///
    /// Only call this after finishing the owned keys: two callers each owning
    /// a key the other waits on would otherwise wait forever.
    pub async fn wait(&mut self) -> Result<Vec<(K, Arc<CacheEntry<V>>)>> {
        let waiting = std::mem::take(&mut self.waiting);
        let results = join_all(
            waiting
                .into_iter()
                .map(|(key, ticket)| async move { (key, ticket.await) }),
        )
        .await;

        results
            .into_iter()
            .map(|(key, outcome)| match outcome {
                Ok(Ok(entry)) => Ok((key, entry)),
                Ok(Err(error)) => Err(error),
                Err(oneshot::Canceled) => Err(CacheError::abandoned(&key)),
            })
            .collect()
    }
}

impl<K, V> Drop for Claim<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        for (key, _) in self.owned.drain(..) {
            self.table.tickets.remove(&key);
        }
    }
}

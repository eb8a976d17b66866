//! Loader Module
//!
//! The boundary between the cache and whatever actually produces values.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::future::Future;
use std::hash::Hash;

use anyhow::Context as _;
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::{Map, Value};

// == Batch Loader ==
/// Fills in values for a batch of keys.
///
/// The cache never hands the same key to two concurrent synchronous loads;
/// calls for disjoint key sets may run concurrently.
#[async_trait]
pub trait BatchLoader<K, V>: Send + Sync {
    /// Populates `batch` in place. Keys left empty are cached as not found.
    async fn load(&self, ctx: &LoadContext, batch: &mut LoadBatch<K, V>) -> anyhow::Result<()>;
}

/// Adapts a synchronous closure into a [`BatchLoader`].
pub fn loader_fn<F>(f: F) -> LoaderFn<F> {
    LoaderFn(f)
}

/// Loader built by [`loader_fn`].
#[derive(Clone)]
pub struct LoaderFn<F>(F);

#[async_trait]
impl<K, V, F> BatchLoader<K, V> for LoaderFn<F>
where
    K: Send + Sync,
    V: Send + Sync,
    F: Fn(&LoadContext, &mut LoadBatch<K, V>) -> anyhow::Result<()> + Send + Sync,
{
    async fn load(&self, ctx: &LoadContext, batch: &mut LoadBatch<K, V>) -> anyhow::Result<()> {
        (self.0)(ctx, batch)
    }
}

impl<F> Debug for LoaderFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoaderFn")
    }
}

// == Load Context ==
/// Why a load is happening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// A caller is waiting on a missing or expired key
    Miss,
    /// Background refresh of a stale key
    Refresh,
}

/// Per-invocation context handed to the loader.
///
/// Carries named bindings the loader may read. A new context is built for
/// every refresh batch.
#[derive(Debug, Clone)]
pub struct LoadContext {
    origin: LoadOrigin,
    bindings: Map<String, Value>,
}

impl LoadContext {
    pub fn new(origin: LoadOrigin) -> Self {
        Self {
            origin,
            bindings: Map::new(),
        }
    }

    pub fn miss() -> Self {
        Self::new(LoadOrigin::Miss)
    }

    pub fn refresh() -> Self {
        Self::new(LoadOrigin::Refresh)
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn origin(&self) -> LoadOrigin {
        self.origin
    }

    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

impl Default for LoadContext {
    fn default() -> Self {
        Self::miss()
    }
}

// == Load Batch ==
enum Loaded<V> {
    Ready(V),
    Deferred(BoxFuture<'static, anyhow::Result<Option<V>>>),
}

/// Requested keys, in request order, with the slot the loader fills for each.
pub struct LoadBatch<K, V> {
    keys: Vec<K>,
    slots: HashMap<K, Loaded<V>>,
}

impl<K, V> LoadBatch<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        let mut keys: Vec<K> = keys.into_iter().collect();
        let mut seen = HashSet::with_capacity(keys.len());
        keys.retain(|key| seen.insert(key.clone()));

        Self {
            keys,
            slots: HashMap::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Supplies the value for a requested key.
    ///
    /// Returns false, and ignores the value, if `key` is not part of the batch.
    pub fn insert(&mut self, key: &K, value: V) -> bool {
        self.fill(key, Loaded::Ready(value))
    }

    /// Supplies a value that is still being computed.
    ///
    /// The cache awaits it before storing; `Ok(None)` means not found and an
    /// error fails the whole batch.
    pub fn defer<F>(&mut self, key: &K, value: F) -> bool
    where
        F: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
    {
        self.fill(key, Loaded::Deferred(value.boxed()))
    }

    /// Clears whatever was supplied for `key`.
    pub fn mark_not_found(&mut self, key: &K) {
        self.slots.remove(key);
    }

    /// Returns the ready value supplied for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        match self.slots.get(key)? {
            Loaded::Ready(value) => Some(value),
            Loaded::Deferred(_) => None,
        }
    }

    fn fill(&mut self, key: &K, loaded: Loaded<V>) -> bool {
        if !self.contains(key) {
            return false;
        }
        self.slots.insert(key.clone(), loaded);
        true
    }

    /// Awaits deferred values and returns every requested key with its result.
    pub(crate) async fn resolve(self) -> anyhow::Result<Vec<(K, Option<V>)>>
    where
        K: Debug,
    {
        let Self { keys, mut slots } = self;

        let pending = keys.into_iter().map(|key| {
            let slot = slots.remove(&key);
            async move {
                let value = match slot {
                    None => None,
                    Some(Loaded::Ready(value)) => Some(value),
                    Some(Loaded::Deferred(future)) => future
                        .await
                        .with_context(|| format!("deferred value for {key:?} failed"))?,
                };
                Ok::<_, anyhow::Error>((key, value))
            }
        });

        try_join_all(pending).await
    }
}

impl<K: Debug, V> Debug for LoadBatch<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBatch")
            .field("keys", &self.keys)
            .field("filled", &self.slots.len())
            .finish()
    }
}

//! Live handler bookkeeping.
//!
//! Maps each [`GroupKey`] to at most one live [`GroupHandler`]. Handlers are
//! built lazily on first resolution and stay until they release themselves;
//! there is no capacity or time based eviction.
//!
//! # Concurrency
//!
//! - Resolution goes through the `DashMap` entry API, so lookup-or-construct
//!   for one key happens under that key's shard lock. Concurrent first
//!   touches construct exactly one handler and all callers get it.
//! - Removal matches on [`HandlerId`], never on key alone, so a stale
//!   handler releasing itself cannot evict the replacement built after it.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::{Arc, Weak};

use super::classify::GroupKey;
use super::handler::{GroupHandler, HandlerContext, HandlerFactory, HandlerId, HandlerParams};
use super::listeners::ListenerSet;
use crate::vfs::{VfsError, VfsOps, VfsResult};

struct Slot {
    id: HandlerId,
    handler: Arc<dyn GroupHandler>,
}

/// Registry of live sequence handlers.
pub struct HandlerRegistry {
    handlers: DashMap<GroupKey, Slot>,
    factory: Arc<dyn HandlerFactory>,
    backing: Arc<dyn VfsOps>,
    params: HandlerParams,
    listeners: Arc<ListenerSet>,
    /// Handed to handlers as their way back in.
    this: Weak<HandlerRegistry>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("live", &self.handlers.len())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl HandlerRegistry {
    /// Create an empty registry whose handlers are bound to `backing`.
    pub fn new(
        backing: Arc<dyn VfsOps>,
        factory: Arc<dyn HandlerFactory>,
        params: HandlerParams,
        listeners: Arc<ListenerSet>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            handlers: DashMap::new(),
            factory,
            backing,
            params,
            listeners,
            this: this.clone(),
        })
    }

    /// Return the live handler for `key`, constructing it if there is none.
    ///
    /// A factory failure is reported as [`VfsError::HandlerUnavailable`] and
    /// leaves the key unregistered, so the next call tries again.
    pub fn resolve(&self, key: &GroupKey) -> VfsResult<Arc<dyn GroupHandler>> {
        if let Some(slot) = self.handlers.get(key) {
            return Ok(Arc::clone(&slot.handler));
        }

        match self.handlers.entry(key.clone()) {
            Entry::Occupied(slot) => Ok(Arc::clone(&slot.get().handler)),
            Entry::Vacant(vacant) => {
                let ctx = HandlerContext {
                    id: HandlerId::new(),
                    key: key.clone(),
                    backing: Arc::clone(&self.backing),
                    params: self.params,
                    listeners: Arc::clone(&self.listeners),
                    registry: RegistryHandle {
                        registry: self.this.clone(),
                    },
                };
                let expected = ctx.id;

                let handler = self.factory.create(ctx).map_err(|e| {
                    tracing::warn!(key = %key, error = %e, "sequence handler construction failed");
                    VfsError::handler_unavailable(format!("{key}: {e}"))
                })?;

                let id = handler.id();
                if id != expected {
                    tracing::warn!(key = %key, %id, %expected, "handler reported a foreign id");
                }
                tracing::debug!(key = %key, %id, "sequence handler created");

                vacant.insert(Slot {
                    id,
                    handler: Arc::clone(&handler),
                });
                Ok(handler)
            }
        }
    }

    /// The live handler for `key`, without creating one.
    pub fn get(&self, key: &GroupKey) -> Option<Arc<dyn GroupHandler>> {
        self.handlers.get(key).map(|slot| Arc::clone(&slot.handler))
    }

    /// Drop the handler with identity `id`.
    ///
    /// Returns `false` (and does nothing) if no live handler has that id,
    /// which covers double release and release racing a replacement.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut removed: Option<GroupKey> = None;
        self.handlers.retain(|key, slot| {
            if removed.is_none() && slot.id == id {
                removed = Some(key.clone());
                false
            } else {
                true
            }
        });

        match removed {
            Some(key) => {
                tracing::debug!(key = %key, %id, "sequence handler removed");
                true
            }
            None => {
                tracing::trace!(%id, "release of unknown handler ignored");
                false
            }
        }
    }

    /// Number of live handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Keys of all live sequences, sorted.
    pub fn keys(&self) -> Vec<GroupKey> {
        let mut keys: Vec<_> = self.handlers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// A handler's non-owning way back into the registry that built it.
#[derive(Clone)]
pub struct RegistryHandle {
    registry: Weak<HandlerRegistry>,
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryHandle")
            .field("alive", &(self.registry.strong_count() > 0))
            .finish()
    }
}

impl RegistryHandle {
    /// A handle attached to no registry; `release` always returns `false`.
    pub fn detached() -> Self {
        Self {
            registry: Weak::new(),
        }
    }

    /// Ask the registry to forget handler `id`.
    ///
    /// Returns `true` if this call removed it. Safe to call repeatedly and
    /// after the registry is gone.
    pub fn release(&self, id: HandlerId) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(id),
            None => false,
        }
    }
}

// Handler Registry Module
//
// INTENTION:
// A thread-safe map from (name, owning node) to type-erased handlers. The same
// registry type is used for subscriptions, service repliers and outstanding
// requests. The registry never calls a handler: lookups copy the matching
// handlers out under the shard lock and return them, so callers invoke them
// with no registry lock held. A slow or re-entrant callback therefore cannot
// stall other registry operations.
//
// ARCHITECTURAL PRINCIPLES:
// 1. Names are validated before they get here - all APIs take TopicName
// 2. Ownership - every entry is tagged with the node that registered it, so a
//    node can remove exactly its own handlers
// 3. Atomic per name - each operation runs under the lock of the name's shard

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use nodelink_common::{Logger, TopicName};

use super::Handler;

/// handler id -> handler
type OwnedHandlers<H> = HashMap<String, Arc<H>>;

/// owner node id -> handlers registered by that node
type NameEntry<H> = HashMap<String, OwnedHandlers<H>>;

pub struct HandlerRegistry<H: ?Sized + Handler> {
    /// Role of this registry, used in log lines
    role: &'static str,
    entries: DashMap<String, NameEntry<H>>,
    logger: Logger,
}

impl<H: ?Sized + Handler> HandlerRegistry<H> {
    pub fn new(role: &'static str, logger: Logger) -> Self {
        Self {
            role,
            entries: DashMap::new(),
            logger,
        }
    }

    /// Register `handler` for `name`, replacing whatever `owner` had registered there.
    ///
    /// Returns true when a previous handler was replaced.
    pub fn insert(&self, name: &TopicName, owner: &str, handler: Arc<H>) -> bool {
        let replaced = {
            let mut entry = self.entries.entry(name.as_str().to_string()).or_default();
            let owned = entry.entry(owner.to_string()).or_default();
            let replaced = !owned.is_empty();
            owned.clear();
            owned.insert(handler.handler_id().to_string(), handler);
            replaced
        };
        self.logger.debug_args(format_args!(
            "{} handler for [{name}] owned by {owner} {}",
            self.role,
            if replaced { "replaced" } else { "registered" }
        ));
        replaced
    }

    /// Register `handler` next to any handlers `owner` already has for `name`
    pub fn add(&self, name: &TopicName, owner: &str, handler: Arc<H>) {
        let handler_id = handler.handler_id().to_string();
        self.entries
            .entry(name.as_str().to_string())
            .or_default()
            .entry(owner.to_string())
            .or_default()
            .insert(handler_id.clone(), handler);
        self.logger.debug_args(format_args!(
            "{} handler {handler_id} added for [{name}] owned by {owner}",
            self.role
        ));
    }

    /// Snapshot of every handler registered for `name`, as (owner, handler)
    pub fn lookup_all(&self, name: &TopicName) -> Vec<(String, Arc<H>)> {
        match self.entries.get(name.as_str()) {
            Some(entry) => entry
                .iter()
                .flat_map(|(owner, handlers)| {
                    handlers
                        .values()
                        .map(move |handler| (owner.clone(), Arc::clone(handler)))
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// First handler registered for `name` that satisfies `matches`.
    ///
    /// Handlers are checked in owner order so repeated lookups agree.
    pub fn find(&self, name: &TopicName, matches: impl Fn(&H) -> bool) -> Option<Arc<H>> {
        let entry = self.entries.get(name.as_str())?;
        let mut owners: Vec<&String> = entry.keys().collect();
        owners.sort();
        owners
            .into_iter()
            .filter_map(|owner| entry.get(owner))
            .flat_map(|handlers| handlers.values())
            .find(|handler| matches(handler))
            .cloned()
    }

    pub fn has_handlers(&self, name: &TopicName) -> bool {
        self.entries
            .get(name.as_str())
            .map(|entry| entry.values().any(|handlers| !handlers.is_empty()))
            .unwrap_or(false)
    }

    /// Remove a single handler by id. Returns the removed handler.
    pub fn remove(&self, name: &TopicName, handler_id: &str) -> Option<Arc<H>> {
        let removed = {
            let mut entry = self.entries.get_mut(name.as_str())?;
            let removed = entry
                .values_mut()
                .find_map(|handlers| handlers.remove(handler_id));
            entry.retain(|_, handlers| !handlers.is_empty());
            removed
        };
        self.drop_if_empty(name);
        if removed.is_some() {
            self.logger.debug_args(format_args!(
                "{} handler {handler_id} removed from [{name}]",
                self.role
            ));
        }
        removed
    }

    /// Remove every handler `owner` registered for `name`
    pub fn remove_for_owner(&self, name: &TopicName, owner: &str) -> Vec<Arc<H>> {
        let removed: Vec<Arc<H>> = match self.entries.get_mut(name.as_str()) {
            Some(mut entry) => entry
                .remove(owner)
                .map(|handlers| handlers.into_values().collect())
                .unwrap_or_default(),
            None => return Vec::new(),
        };
        self.drop_if_empty(name);
        self.logger.debug_args(format_args!(
            "{} removed {} handler(s) for [{name}] owned by {owner}",
            self.role,
            removed.len()
        ));
        removed
    }

    /// Remove every handler `owner` registered under any name
    pub fn remove_all_for_owner(&self, owner: &str) -> Vec<Arc<H>> {
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            if let Some(handlers) = entry.remove(owner) {
                removed.extend(handlers.into_values());
            }
            !entry.is_empty()
        });
        if !removed.is_empty() {
            self.logger.debug_args(format_args!(
                "{} removed {} handler(s) owned by {owner}",
                self.role,
                removed.len()
            ));
        }
        removed
    }

    /// Remove every handler of every owner
    pub fn drain(&self) -> Vec<Arc<H>> {
        let mut removed = Vec::new();
        self.entries.retain(|_, entry| {
            for (_, handlers) in entry.drain() {
                removed.extend(handlers.into_values());
            }
            false
        });
        removed
    }

    /// Total number of registered handlers
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.value().values().map(HashMap::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_if_empty(&self, name: &TopicName) {
        self.entries
            .remove_if(name.as_str(), |_, entry| entry.is_empty());
    }
}

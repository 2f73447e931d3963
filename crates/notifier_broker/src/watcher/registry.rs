//! Bookkeeping of the watcher, kept apart from the bus so it can be reasoned about on its own.

use std::collections::HashMap;

use crate::{names, Error, Result};

/// Counts, per peer connection, how many registrations are held on its behalf.
///
/// The bus only tells us that a peer left, at which point all of its references are gone at
/// once. Entries whose peer has a count of zero are dead.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    refs: HashMap<String, usize>,
}

impl LivenessTracker {
    pub fn track(&mut self, peer: &str) {
        *self.refs.entry(peer.to_owned()).or_default() += 1;
    }

    pub fn count(&self, peer: &str) -> usize {
        self.refs.get(peer).copied().unwrap_or(0)
    }

    /// Drop every reference held for `peer`. Returns whether it was tracked at all.
    pub fn release(&mut self, peer: &str) -> bool {
        self.refs.remove(peer).is_some()
    }
}

/// Something the registry forgot because its peer went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Item(String),
    Host(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    id: String,
    peer: String,
}

/// The registered items, in registration order, and the single registered host.
#[derive(Debug, Default)]
pub struct Registry {
    items: Vec<Entry>,
    host: Option<Entry>,
    liveness: LivenessTracker,
}

/// Key under which an item registered by `sender` is published.
///
/// An item that registers its own bus name is found at the default object path. Anything else is
/// appended to the sender's name as given, which for the usual object path argument yields
/// `{sender}{path}`.
pub fn item_id(identifier: &str, sender: &str) -> String {
    if identifier == sender {
        format!("{}{}", identifier, names::ITEM_OBJECT)
    } else {
        format!("{}{}", sender, identifier)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item. Returns the new item id, or `None` if that id was already registered.
    pub fn register_item(&mut self, identifier: &str, sender: &str) -> Result<Option<String>> {
        if identifier.is_empty() {
            return Err(Error::InvalidArgs("empty StatusNotifierItem identifier".to_owned()));
        }
        let id = item_id(identifier, sender);
        if self.items.iter().any(|entry| entry.id == id) {
            return Ok(None);
        }
        self.liveness.track(sender);
        self.items.push(Entry { id: id.clone(), peer: sender.to_owned() });
        Ok(Some(id))
    }

    pub fn register_host(&mut self, identifier: &str, sender: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(Error::InvalidArgs("empty StatusNotifierHost identifier".to_owned()));
        }
        if let Some(host) = &self.host {
            return Err(Error::AlreadyRegistered(host.id.clone()));
        }
        self.liveness.track(sender);
        self.host = Some(Entry { id: identifier.to_owned(), peer: sender.to_owned() });
        Ok(())
    }

    /// Called when `peer` left the bus. Everything that is no longer held by a live peer is
    /// removed and returned, each exactly once.
    pub fn peer_vanished(&mut self, peer: &str) -> Vec<Removal> {
        if !self.liveness.release(peer) {
            return Vec::new();
        }

        let liveness = &self.liveness;
        let mut removed = Vec::new();
        self.items.retain(|entry| {
            let alive = liveness.count(&entry.peer) > 0;
            if !alive {
                removed.push(Removal::Item(entry.id.clone()));
            }
            alive
        });
        if self.host.as_ref().is_some_and(|host| liveness.count(&host.peer) == 0) {
            if let Some(host) = self.host.take() {
                removed.push(Removal::Host(host.id));
            }
        }
        removed
    }

    pub fn is_host_registered(&self) -> bool {
        self.host.is_some()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_ref().map(|host| host.id.as_str())
    }

    pub fn registered_items(&self) -> Vec<String> {
        self.items.iter().map(|entry| entry.id.clone()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_item_id() {
        assert_eq!(item_id("org.test.App", "org.test.App"), "org.test.App/StatusNotifierItem");
        assert_eq!(item_id("org.test.App2", "org.test.Helper"), "org.test.Helperorg.test.App2");
        assert_eq!(item_id("/org/ayatana/NotificationItem/nm", ":1.50"), ":1.50/org/ayatana/NotificationItem/nm");
    }

    #[test]
    fn test_register_item_is_idempotent() {
        let mut registry = Registry::new();
        assert_eq!(registry.register_item("/StatusNotifierItem", ":1.5").unwrap(), Some(":1.5/StatusNotifierItem".into()));
        assert_eq!(registry.register_item("/StatusNotifierItem", ":1.5").unwrap(), None);
        assert_eq!(registry.registered_items(), vec![":1.5/StatusNotifierItem".to_string()]);
    }

    #[test]
    fn test_register_empty_item_fails() {
        let mut registry = Registry::new();
        assert!(matches!(registry.register_item("", ":1.5"), Err(Error::InvalidArgs(_))));
        assert!(registry.registered_items().is_empty());
    }

    #[test]
    fn test_second_host_is_rejected() {
        let mut registry = Registry::new();
        registry.register_host("A", ":1.1").unwrap();
        match registry.register_host("B", ":1.2") {
            Err(Error::AlreadyRegistered(owner)) => assert_eq!(owner, "A"),
            other => panic!("expected AlreadyRegistered, got {:?}", other),
        }
        assert!(registry.is_host_registered());
        assert_eq!(registry.host(), Some("A"));
    }

    #[test]
    fn test_peer_vanishing_removes_its_items_once() {
        let mut registry = Registry::new();
        registry.register_item("/a", ":1.5").unwrap();
        registry.register_item("/b", ":1.6").unwrap();
        registry.register_item("/c", ":1.5").unwrap();

        assert_eq!(
            registry.peer_vanished(":1.5"),
            vec![Removal::Item(":1.5/a".into()), Removal::Item(":1.5/c".into())]
        );
        assert_eq!(registry.registered_items(), vec![":1.6/b".to_string()]);
        assert_eq!(registry.peer_vanished(":1.5"), vec![]);
    }

    #[test]
    fn test_host_vanishing_frees_the_slot() {
        let mut registry = Registry::new();
        registry.register_host("A", ":1.1").unwrap();
        registry.register_item("/a", ":1.1").unwrap();
        assert_eq!(registry.peer_vanished(":1.1"), vec![Removal::Item(":1.1/a".into()), Removal::Host("A".into())]);
        assert!(!registry.is_host_registered());
        registry.register_host("B", ":1.2").unwrap();
        assert_eq!(registry.host(), Some("B"));
    }

    #[test]
    fn test_unknown_peer_vanishing_is_noop() {
        let mut registry = Registry::new();
        registry.register_item("/a", ":1.5").unwrap();
        assert_eq!(registry.peer_vanished(":1.9"), vec![]);
        assert_eq!(registry.registered_items().len(), 1);
    }

    #[test]
    fn test_register_then_vanish_is_not_listed() {
        let mut registry = Registry::new();
        registry.register_item("org.test.App", "org.test.App").unwrap();
        registry.peer_vanished("org.test.App");
        assert!(registry.registered_items().is_empty());
    }

    #[test]
    fn test_reregistering_after_removal() {
        let mut registry = Registry::new();
        registry.register_item("/a", ":1.5").unwrap();
        registry.peer_vanished(":1.5");
        assert_eq!(registry.register_item("/a", ":1.5").unwrap(), Some(":1.5/a".into()));
        assert_eq!(registry.peer_vanished(":1.5"), vec![Removal::Item(":1.5/a".into())]);
    }
}

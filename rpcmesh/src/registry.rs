//! Known peers and live connections.
//!
//! The [`Registry`] answers "who exists" (by id and by role, for lookups
//! and broadcast). The [`SocketPool`] answers "who is reachable right now"
//! and is the only source of truth for that: a peer is Active exactly when
//! its link is in the pool.

use std::collections::HashMap;
use std::rc::Rc;

use crate::identity::PeerIdentity;
use crate::peer::Link;

/// Peer identities indexed by id and by role.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_id: HashMap<String, Rc<PeerIdentity>>,
    by_role: HashMap<String, Vec<Rc<PeerIdentity>>>,
}

impl Registry {
    /// Insert a peer. Returns false, leaving the registry untouched, when the
    /// id is already taken.
    pub(crate) fn add(&mut self, peer: Rc<PeerIdentity>) -> bool {
        if self.by_id.contains_key(&peer.id) {
            return false;
        }
        self.by_role
            .entry(peer.role.clone())
            .or_default()
            .push(peer.clone());
        self.by_id.insert(peer.id.clone(), peer);
        true
    }

    /// Remove this exact identity. An entry re-registered under the same id
    /// by another connection is left alone.
    pub(crate) fn remove(&mut self, peer: &Rc<PeerIdentity>) -> bool {
        match self.by_id.get(&peer.id) {
            Some(current) if Rc::ptr_eq(current, peer) => {}
            _ => return false,
        }
        self.by_id.remove(&peer.id);

        if let Some(list) = self.by_role.get_mut(&peer.role) {
            list.retain(|p| !Rc::ptr_eq(p, peer));
            if list.is_empty() {
                self.by_role.remove(&peer.role);
            }
        }
        true
    }

    pub(crate) fn get(&self, id: &str) -> Option<Rc<PeerIdentity>> {
        self.by_id.get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Snapshot of the peers with `role`, in registration order.
    pub(crate) fn by_role(&self, role: &str) -> Vec<Rc<PeerIdentity>> {
        self.by_role.get(role).cloned().unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}

/// Live links keyed by peer id.
#[derive(Debug, Default)]
pub(crate) struct SocketPool {
    links: HashMap<String, Link>,
}

impl SocketPool {
    /// Store the link for `id`, returning the one it replaced.
    pub(crate) fn add(&mut self, id: &str, link: Link) -> Option<Link> {
        self.links.insert(id.to_string(), link)
    }

    /// Remove the link for `id` only if it is the link `link_id`.
    pub(crate) fn remove(&mut self, id: &str, link_id: u64) -> bool {
        if self.links.get(id).is_some_and(|l| l.id() == link_id) {
            self.links.remove(id);
            true
        } else {
            false
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<Link> {
        self.links.get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.links.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, role: &str) -> Rc<PeerIdentity> {
        Rc::new(PeerIdentity::new(id, role))
    }

    #[test]
    fn test_indexes_stay_consistent() {
        let mut registry = Registry::default();
        let a = peer("a1", "area");
        let b = peer("a2", "area");
        let g = peer("g1", "gate");
        assert!(registry.add(a.clone()));
        assert!(registry.add(b.clone()));
        assert!(registry.add(g.clone()));

        let ids: Vec<_> = registry.by_role("area").iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);

        assert!(registry.remove(&a));
        assert!(!registry.contains("a1"));
        let ids: Vec<_> = registry.by_role("area").iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["a2"]);

        assert!(registry.remove(&b));
        assert!(registry.by_role("area").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut registry = Registry::default();
        assert!(registry.add(peer("x", "area")));
        assert!(!registry.add(peer("x", "gate")));
        assert!(registry.by_role("gate").is_empty());
        assert_eq!(registry.get("x").map(|p| p.role.clone()), Some("area".into()));
    }

    #[test]
    fn test_remove_is_by_identity() {
        let mut registry = Registry::default();
        let first = peer("x", "area");
        let second = peer("x", "area");
        assert!(registry.add(first.clone()));

        // A stale handle with the same id must not evict the live entry.
        assert!(!registry.remove(&second));
        assert!(registry.contains("x"));
        assert_eq!(registry.by_role("area").len(), 1);

        assert!(registry.remove(&first));
        assert!(!registry.contains("x"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut registry = Registry::default();
        registry.add(peer("a1", "area"));
        let snapshot = registry.by_role("area");
        registry.add(peer("a2", "area"));
        assert_eq!(snapshot.len(), 1);
    }
}

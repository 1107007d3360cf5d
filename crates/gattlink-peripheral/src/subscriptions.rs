use std::collections::{HashMap, HashSet};

use gattlink_core::PeerId;
use uuid::Uuid;

/// Per-characteristic set of subscribed peers.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    sets: HashMap<Uuid, HashSet<PeerId>>,
}

impl SubscriptionRegistry {
    /// Adds `peer` to the subscribers of `characteristic`. Returns true when newly added.
    pub fn subscribe(&mut self, characteristic: Uuid, peer: PeerId) -> bool {
        self.sets.entry(characteristic).or_default().insert(peer)
    }

    /// Removes `peer` from the subscribers of `characteristic`. Returns true when it was present.
    pub fn unsubscribe(&mut self, characteristic: Uuid, peer: &PeerId) -> bool {
        let Some(set) = self.sets.get_mut(&characteristic) else {
            return false;
        };
        let removed = set.remove(peer);
        if set.is_empty() {
            self.sets.remove(&characteristic);
        }
        removed
    }

    pub fn subscribers_of(&self, characteristic: Uuid) -> HashSet<PeerId> {
        self.sets.get(&characteristic).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, characteristic: Uuid, peer: &PeerId) -> bool {
        self.sets
            .get(&characteristic)
            .is_some_and(|set| set.contains(peer))
    }

    /// Drops `peer` from every set; returns the characteristics it left.
    pub fn remove_peer(&mut self, peer: &PeerId) -> Vec<Uuid> {
        let mut left = Vec::new();
        self.sets.retain(|characteristic, set| {
            if set.remove(peer) {
                left.push(*characteristic);
            }
            !set.is_empty()
        });
        left.sort();
        left
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

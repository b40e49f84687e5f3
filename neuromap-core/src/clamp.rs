//! Persistent point sources bound to skeleton nodes.
//!
//! Clamps are mutated from the interactive context and read once per solve
//! step. Every access goes through one mutex; readers copy the whole list out
//! and release the guard before doing any work with it, so a snapshot holds
//! each clamp either wholly before or wholly after any update.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::inject::NodeValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClampId(u64);

impl ClampId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clamp {
    pub id: ClampId,
    /// `None` while the clamp is not focused on any node.
    pub target: Option<usize>,
    pub power: f64,
    pub live: bool,
}

impl Clamp {
    /// What this clamp injects this step, if anything. Inactive, unfocused
    /// and out-of-range clamps contribute nothing.
    pub fn contribution(&self, node_count: usize) -> Option<NodeValue> {
        if !self.live {
            return None;
        }
        let node = self.target.filter(|&n| n < node_count)?;
        Some(NodeValue::new(node, self.power))
    }

    /// Live and focused, but on a node that does not exist.
    pub fn is_stale(&self, node_count: usize) -> bool {
        self.live && self.target.is_some_and(|n| n >= node_count)
    }
}

/// Full replacement for a clamp's mutable fields.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClampUpdate {
    pub target: Option<usize>,
    pub power: f64,
    pub live: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    clamps: Vec<Clamp>,
}

impl Inner {
    fn find_mut(&mut self, id: ClampId) -> Option<&mut Clamp> {
        self.clamps.iter_mut().find(|c| c.id == id)
    }
}

/// Shared clamp list. Clones share the same underlying registry.
#[derive(Clone, Debug, Default)]
pub struct ClampRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ClampRegistry {
    pub fn new() -> ClampRegistry {
        ClampRegistry::default()
    }

    pub fn add(&self, init: ClampUpdate) -> ClampId {
        let mut inner = self.inner.lock();
        let id = ClampId(inner.next_id);
        inner.next_id += 1;
        inner.clamps.push(Clamp {
            id,
            target: init.target,
            power: init.power,
            live: init.live,
        });
        id
    }

    pub fn remove(&self, id: ClampId) -> Option<Clamp> {
        let mut inner = self.inner.lock();
        let idx = inner.clamps.iter().position(|c| c.id == id)?;
        Some(inner.clamps.remove(idx))
    }

    /// Replace target, power and liveness together.
    pub fn update(&self, id: ClampId, update: ClampUpdate) -> bool {
        self.modify(id, |c| {
            c.target = update.target;
            c.power = update.power;
            c.live = update.live;
        })
        .is_some()
    }

    pub fn set_live(&self, id: ClampId, live: bool) -> bool {
        self.modify(id, |c| c.live = live).is_some()
    }

    /// Flip liveness, returning the new state.
    pub fn toggle(&self, id: ClampId) -> Option<bool> {
        self.modify(id, |c| {
            c.live = !c.live;
            c.live
        })
    }

    pub fn set_target(&self, id: ClampId, target: Option<usize>) -> bool {
        self.modify(id, |c| c.target = target).is_some()
    }

    pub fn set_power(&self, id: ClampId, power: f64) -> bool {
        self.modify(id, |c| c.power = power).is_some()
    }

    pub fn get(&self, id: ClampId) -> Option<Clamp> {
        self.inner.lock().clamps.iter().find(|c| c.id == id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().clamps.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clamps.clear();
    }

    pub fn snapshot(&self) -> Vec<Clamp> {
        let mut out = Vec::new();
        self.snapshot_into(&mut out);
        out
    }

    /// Copy every clamp into `out`, reusing its allocation.
    pub fn snapshot_into(&self, out: &mut Vec<Clamp>) {
        out.clear();
        let inner = self.inner.lock();
        out.extend_from_slice(&inner.clamps);
    }

    fn modify<R>(&self, id: ClampId, f: impl FnOnce(&mut Clamp) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.find_mut(id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(target: usize, power: f64) -> ClampUpdate {
        ClampUpdate {
            target: Some(target),
            power,
            live: true,
        }
    }

    #[test]
    fn ids_are_unique_after_removal() {
        let reg = ClampRegistry::new();
        let a = reg.add(live(1, 1.0));
        let b = reg.add(live(2, 1.0));
        assert!(reg.remove(a).is_some());
        let c = reg.add(live(3, 1.0));
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert_eq!(reg.len(), 2);
        assert!(reg.remove(a).is_none());
    }

    #[test]
    fn contribution_skips_inactive_unfocused_and_stale() {
        let reg = ClampRegistry::new();
        let id = reg.add(live(4, 2.5));
        let c = reg.get(id).unwrap();
        assert_eq!(c.contribution(10), Some(NodeValue::new(4, 2.5)));
        assert_eq!(c.contribution(4), None);
        assert!(c.is_stale(4));

        reg.set_target(id, None);
        assert_eq!(reg.get(id).unwrap().contribution(10), None);

        reg.set_target(id, Some(1));
        assert_eq!(reg.toggle(id), Some(false));
        assert_eq!(reg.get(id).unwrap().contribution(10), None);
        assert!(!reg.get(id).unwrap().is_stale(0));
    }

    #[test]
    fn update_replaces_every_field() {
        let reg = ClampRegistry::new();
        let id = reg.add(live(0, 1.0));
        let next = ClampUpdate {
            target: Some(9),
            power: -3.0,
            live: false,
        };
        assert!(reg.update(id, next));
        let c = reg.get(id).unwrap();
        assert_eq!((c.target, c.power, c.live), (Some(9), -3.0, false));
        assert!(!reg.update(ClampId(99), next));
    }

    #[test]
    fn clones_share_state() {
        let reg = ClampRegistry::new();
        let other = reg.clone();
        let id = reg.add(live(2, 1.0));
        assert!(other.set_power(id, 7.0));
        assert_eq!(reg.snapshot()[0].power, 7.0);
        other.clear();
        assert!(reg.is_empty());
    }
}

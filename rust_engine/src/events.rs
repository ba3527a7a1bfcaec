//! 事件订阅：句柄释放即退订

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

type Listeners<K> = Rc<RefCell<BTreeMap<u64, K>>>;

/// 订阅表
pub struct EventRegistry<K: Copy + Ord> {
    listeners: Listeners<K>,
    next_id: Cell<u64>,
}

impl<K: Copy + Ord> Default for EventRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Ord> EventRegistry<K> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(BTreeMap::new())),
            next_id: Cell::new(1),
        }
    }

    pub fn subscribe(&self, key: K) -> Subscription<K> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().insert(id, key);
        Subscription {
            listeners: Rc::downgrade(&self.listeners),
            id,
        }
    }

    /// 当前订阅者（去重、有序）
    pub fn subscribers(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.listeners.borrow().values().copied().collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn is_subscribed(&self, key: K) -> bool {
        self.listeners.borrow().values().any(|k| *k == key)
    }
}

/// 订阅句柄
pub struct Subscription<K: Copy + Ord> {
    listeners: Weak<RefCell<BTreeMap<u64, K>>>,
    id: u64,
}

impl<K: Copy + Ord> Drop for Subscription<K> {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().remove(&self.id);
        }
    }
}

impl<K: Copy + Ord + std::fmt::Debug> std::fmt::Debug for Subscription<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_unsubscribes() {
        let registry = EventRegistry::new();
        let a = registry.subscribe(3u16);
        let b = registry.subscribe(1u16);
        assert_eq!(registry.subscribers(), vec![1, 3]);
        drop(a);
        assert_eq!(registry.subscribers(), vec![1]);
        drop(b);
        assert!(!registry.is_subscribed(1));
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = EventRegistry::new();
        let subscription = registry.subscribe(7u16);
        drop(registry);
        drop(subscription);
    }
}

//! 已上报ID记忆
//! Bounded set of identities already reported as new
//!
//! 超出容量时整体清空 (clear-on-overflow), 而不是逐个淘汰最旧的ID.
//! 清空后保留本次插入的ID, 因此溢出后大小为 1.

use std::collections::HashSet;

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct IdentityMemory {
    ids: HashSet<u32>,
    capacity: usize,
    /// 记忆周期计数 (每次清空 +1)
    epoch: u64,
}

impl Default for IdentityMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl IdentityMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: HashSet::with_capacity(capacity + 1),
            capacity,
            epoch: 0,
        }
    }

    pub fn contains(&self, identity: u32) -> bool {
        self.ids.contains(&identity)
    }

    /// 记录ID. 返回 `true` 表示这次插入触发了清空.
    pub fn insert(&mut self, identity: u32) -> bool {
        if self.ids.contains(&identity) {
            return false;
        }

        let overflow = self.ids.len() + 1 > self.capacity;
        if overflow {
            self.clear();
        }
        self.ids.insert(identity);
        overflow
    }

    /// 清空记忆, 开始新的周期
    pub fn clear(&mut self) {
        self.ids.clear();
        self.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

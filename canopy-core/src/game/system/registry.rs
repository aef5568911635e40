use std::{collections::HashMap, hash::Hash};

#[derive(Debug, Clone, Copy)]
struct Entry<K, O> {
    key: K,
    order: O,
    seq: u64,
}

/// 带墓碑与延迟压缩的稀疏数组集合。
///
/// - 插入先进入缓冲区，只有 [`flush`](Self::flush) 之后才对遍历可见；
/// - 删除把槽位改写为空洞，空洞数达到阈值时整体压缩；
/// - 遍历期间（`begin_pass` 与 `end_pass` 之间）从不压缩，槽位下标保持稳定。
///
/// 刷新时按 `(order, 插入序号)` 稳定排序，因此 `O = ()` 时就是插入顺序。
#[derive(Debug)]
pub(crate) struct CompactingRegistry<K, O = ()> {
    slots: Vec<Option<Entry<K, O>>>,
    index: HashMap<K, usize>,
    pending: Vec<Entry<K, O>>,
    holes: usize,
    threshold: usize,
    /// 嵌套遍历深度，大于 0 时不压缩。
    passes: u32,
    next_seq: u64,
}

impl<K, O> CompactingRegistry<K, O>
where
    K: Copy + Eq + Hash,
    O: Copy + Ord,
{
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            pending: Vec::new(),
            holes: 0,
            threshold: threshold.max(1),
            passes: 0,
            next_seq: 0,
        }
    }

    /// 把 `key` 放入缓冲区；已存在（无论是否已刷新）时返回 `false`。
    pub(crate) fn insert(&mut self, key: K, order: O) -> bool {
        if self.contains(key) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Entry { key, order, seq });
        true
    }

    pub(crate) fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key) || self.pending.iter().any(|entry| entry.key == key)
    }

    /// 删除 `key`：已刷新的条目变为墓碑，缓冲中的条目直接丢弃。
    pub(crate) fn remove(&mut self, key: K) -> bool {
        if let Some(slot) = self.index.remove(&key) {
            self.slots[slot] = None;
            self.holes += 1;
            self.compact_if_needed();
            return true;
        }
        if let Some(position) = self.pending.iter().position(|entry| entry.key == key) {
            self.pending.remove(position);
            return true;
        }
        false
    }

    /// 把缓冲区合并进活动槽位并按排序键重排。遍历期间调用时不做任何事。
    pub(crate) fn flush(&mut self) {
        if self.pending.is_empty() || self.iterating() {
            return;
        }
        let mut entries: Vec<Entry<K, O>> = self.slots.drain(..).flatten().collect();
        entries.append(&mut self.pending);
        entries.sort_by(|a, b| a.order.cmp(&b.order).then(a.seq.cmp(&b.seq)));
        self.rebuild(entries);
    }

    pub(crate) fn begin_pass(&mut self) {
        self.passes += 1;
    }

    /// 结束一层遍历；最外层结束后才可能压缩。
    pub(crate) fn end_pass(&mut self) {
        self.passes = self.passes.saturating_sub(1);
        self.compact_if_needed();
    }

    fn iterating(&self) -> bool {
        self.passes > 0
    }

    /// 当前槽位总数（含墓碑），遍历时作为上界。
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn key_at(&self, slot: usize) -> Option<K> {
        self.slots.get(slot).copied().flatten().map(|entry| entry.key)
    }

    /// 活动条目数（不含缓冲区与墓碑）。
    pub(crate) fn live_len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.live_len() + self.pending_len()
    }

    #[cfg(test)]
    pub(crate) fn holes(&self) -> usize {
        self.holes
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.slots.iter().flatten().map(|entry| entry.key)
    }

    fn compact_if_needed(&mut self) {
        if !self.iterating() && self.holes >= self.threshold {
            let entries: Vec<Entry<K, O>> = self.slots.drain(..).flatten().collect();
            self.rebuild(entries);
        }
    }

    fn rebuild(&mut self, entries: Vec<Entry<K, O>>) {
        self.index.clear();
        self.slots.clear();
        self.slots.reserve(entries.len());
        for entry in entries {
            self.index.insert(entry.key, self.slots.len());
            self.slots.push(Some(entry));
        }
        self.holes = 0;
    }
}

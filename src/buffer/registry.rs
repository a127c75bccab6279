// ============================================================================
// src/buffer/registry.rs - Buffer Identity Registry
// ============================================================================
//! 複合IDからバッファレコードへの所有型マッピング。
//!
//! ロックは持たない。排他は所有者である [`crate::HdmaService`] の
//! 単一Mutexで行う。

use super::handle::HandleId;
use super::id::BufferIdentity;
use super::record::BufferRecord;
use crate::config::DEFAULT_MAX_BUFFERS;
use crate::error::{HdmaError, HdmaResult};
use hashbrown::HashMap;

/// [`BufferRegistry::retain`] の訪問結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// レコードを残す
    Keep,
    /// レコードを削除する
    Remove,
}

/// バッファレジストリ
pub struct BufferRegistry {
    /// ID -> レコード（ハッシュはsequence_idのみ）
    records: HashMap<BufferIdentity, BufferRecord>,
    /// 最大登録数
    capacity: usize,
}

impl BufferRegistry {
    /// 新しいレジストリを作成
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_BUFFERS)
    }

    /// 最大登録数を指定して作成
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            capacity,
        }
    }

    /// レコードを登録
    ///
    /// 同一IDが存在する場合は既存レコードに触れずに失敗する。
    pub fn insert(&mut self, record: BufferRecord) -> HdmaResult<()> {
        let id = record.identity();
        if self.records.contains_key(&id) {
            return Err(HdmaError::AlreadyExists);
        }
        if self.records.len() >= self.capacity {
            return Err(HdmaError::RegistryFull);
        }
        self.records.insert(id, record);
        Ok(())
    }

    /// IDでレコードを検索（全フィールド一致）
    pub fn find_by_identity(&self, id: &BufferIdentity) -> Option<&BufferRecord> {
        self.records.get(id)
    }

    /// IDでレコードを可変で検索
    pub fn find_by_identity_mut(&mut self, id: &BufferIdentity) -> Option<&mut BufferRecord> {
        self.records.get_mut(id)
    }

    /// ローカルハンドルからIDを逆引き
    pub fn find_by_local_ref(&self, handle: HandleId) -> Option<BufferIdentity> {
        self.records
            .values()
            .find(|record| record.handle_id() == Some(handle))
            .map(BufferRecord::identity)
    }

    /// レコードを削除
    pub fn remove(&mut self, id: &BufferIdentity) -> HdmaResult<BufferRecord> {
        self.records.remove(id).ok_or(HdmaError::NotFound)
    }

    /// 全レコードを訪問（読み取り専用）
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&BufferRecord),
    {
        for record in self.records.values() {
            visitor(record);
        }
    }

    /// 全レコードを訪問し、`Visit::Remove` を返したものを削除
    ///
    /// 削除されたレコードは `removed` に渡される（ページ解放などの後始末用）。
    pub fn retain<F, R>(&mut self, mut visitor: F, mut removed: R) -> usize
    where
        F: FnMut(&mut BufferRecord) -> Visit,
        R: FnMut(BufferRecord),
    {
        let mut count = 0;
        for record in self
            .records
            .extract_if(|_, record| visitor(record) == Visit::Remove)
            .map(|(_, record)| record)
        {
            removed(record);
            count += 1;
        }
        count
    }

    /// 登録数を取得
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 全レコードのページ数合計
    pub fn total_pages(&self) -> usize {
        self.records.values().map(BufferRecord::page_count).sum()
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::record::{Announcement, ExportSlot};
    use crate::mm::RemotePageRef;
    use alloc::vec;
    use alloc::vec::Vec;

    fn record(seq: u32, key: [u32; 3], pages: usize) -> BufferRecord {
        BufferRecord::from_announcement(Announcement {
            identity: BufferIdentity::new(seq, key),
            remote_page_refs: vec![RemotePageRef::new(0x2000); pages],
            page_count: pages,
            head_offset: 0,
            tail_length: 0,
            private_data: Vec::new(),
        })
    }

    #[test]
    fn test_duplicate_insert_keeps_first() {
        let mut registry = BufferRegistry::new();
        registry.insert(record(7, [1, 2, 3], 3)).unwrap();

        let dup = record(7, [1, 2, 3], 9);
        assert_eq!(registry.insert(dup), Err(HdmaError::AlreadyExists));

        let found = registry
            .find_by_identity(&BufferIdentity::new(7, [1, 2, 3]))
            .unwrap();
        assert_eq!(found.page_count(), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_sequence_different_key() {
        let mut registry = BufferRegistry::new();
        registry.insert(record(7, [1, 2, 3], 1)).unwrap();
        registry.insert(record(7, [9, 9, 9], 2)).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.find_by_identity(&BufferIdentity::new(7, [1, 2, 4])).is_none());
        assert_eq!(
            registry
                .find_by_identity(&BufferIdentity::new(7, [9, 9, 9]))
                .unwrap()
                .page_count(),
            2
        );
    }

    #[test]
    fn test_capacity_limit() {
        let mut registry = BufferRegistry::with_capacity(1);
        registry.insert(record(1, [0; 3], 1)).unwrap();
        assert_eq!(registry.insert(record(2, [0; 3], 1)), Err(HdmaError::RegistryFull));
    }

    #[test]
    fn test_reverse_lookup_and_remove() {
        let mut registry = BufferRegistry::new();
        let id = BufferIdentity::new(3, [4, 5, 6]);
        let mut rec = record(3, [4, 5, 6], 1);
        rec.local_export_handle = Some(ExportSlot {
            id: HandleId::new(42),
            consumers: 1,
        });
        registry.insert(rec).unwrap();

        assert_eq!(registry.find_by_local_ref(HandleId::new(42)), Some(id));
        assert_eq!(registry.find_by_local_ref(HandleId::new(43)), None);

        registry.remove(&id).unwrap();
        assert!(matches!(registry.remove(&id), Err(HdmaError::NotFound)));
    }

    #[test]
    fn test_retain_removes_inside_visit() {
        let mut registry = BufferRegistry::new();
        for seq in 0..10 {
            registry.insert(record(seq, [seq; 3], seq as usize + 1)).unwrap();
        }

        let mut freed = Vec::new();
        let count = registry.retain(
            |rec| {
                if rec.identity().sequence_id() % 2 == 0 {
                    Visit::Remove
                } else {
                    Visit::Keep
                }
            },
            |rec| freed.push(rec.identity().sequence_id()),
        );

        assert_eq!(count, 5);
        assert_eq!(freed.len(), 5);
        assert_eq!(registry.len(), 5);
        registry.for_each(|rec| assert_eq!(rec.identity().sequence_id() % 2, 1));
        assert_eq!(registry.total_pages(), 2 + 4 + 6 + 8 + 10);
    }
}

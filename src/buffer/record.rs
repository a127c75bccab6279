// ============================================================================
// src/buffer/record.rs - Buffer Record & Announcement
// ============================================================================

use super::handle::HandleId;
use super::id::BufferIdentity;
use crate::mm::{PageSequence, RemotePageRef, SgTable, PAGE_SIZE};
use alloc::vec::Vec;

/// ゲストからのエクスポート通知（型付き表現）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// バッファID
    pub identity: BufferIdentity,
    /// リモートページ参照
    pub remote_page_refs: Vec<RemotePageRef>,
    /// 共有ページ数（0はプライベートデータの再同期のみを意味する）
    pub page_count: usize,
    /// 先頭ページ内のデータ開始オフセット
    pub head_offset: usize,
    /// 最終ページで使用されるバイト数
    pub tail_length: usize,
    /// バッファに付随するプライベートデータ（グラフィックバッファのメタ情報など）
    pub private_data: Vec<u8>,
}

/// ローカルハンドルの割り当て状況
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSlot {
    /// 共有オブジェクトのID
    pub id: HandleId,
    /// 生存中のコンシューマ参照数
    pub consumers: usize,
}

/// レコードの状態（可変フィールドから導出）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// アナウンス済み（未マップ、ハンドルなし）
    Announced,
    /// ページをマップ済み
    Mapped,
    /// ローカルハンドルをエクスポート済み
    Exported,
    /// 初回インポート通知を送信済み
    Imported,
    /// リモート側が無効化したが、ハンドルが残っている
    Zombie,
}

/// バッファレコード: このドメインが知っている共有バッファ1つ分
#[derive(Debug)]
pub struct BufferRecord {
    identity: BufferIdentity,
    remote_page_refs: Vec<RemotePageRef>,
    page_count: usize,
    head_offset: usize,
    tail_length: usize,
    private_data: Vec<u8>,

    // 以下はサービスのロック下でのみ変更される
    /// マップ済みページ（マップ中のみ存在）
    pub(crate) local_pages: Option<PageSequence>,
    /// SGテーブル（遅延構築、ページ解放時に破棄）
    pub(crate) sg_table: Option<SgTable>,
    /// ローカルハンドル
    pub(crate) local_export_handle: Option<ExportSlot>,
    /// false: リモート側が無効化済み
    pub(crate) valid: bool,
    /// true: 初回インポート通知を送信済み
    pub(crate) imported: bool,
}

impl BufferRecord {
    /// アナウンスから新しいレコードを作成
    pub fn from_announcement(announcement: Announcement) -> Self {
        Self {
            identity: announcement.identity,
            remote_page_refs: announcement.remote_page_refs,
            page_count: announcement.page_count,
            head_offset: announcement.head_offset,
            tail_length: announcement.tail_length,
            private_data: announcement.private_data,
            local_pages: None,
            sg_table: None,
            local_export_handle: None,
            valid: true,
            imported: false,
        }
    }

    pub fn identity(&self) -> BufferIdentity {
        self.identity
    }

    pub fn remote_page_refs(&self) -> &[RemotePageRef] {
        &self.remote_page_refs
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn head_offset(&self) -> usize {
        self.head_offset
    }

    pub fn tail_length(&self) -> usize {
        self.tail_length
    }

    pub fn private_data(&self) -> &[u8] {
        &self.private_data
    }

    pub(crate) fn set_private_data(&mut self, data: Vec<u8>) {
        self.private_data = data;
    }

    /// ハンドルのバイトサイズ（オフセットは考慮せずページ単位）
    pub fn byte_size(&self) -> usize {
        self.page_count * PAGE_SIZE
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }

    pub fn is_mapped(&self) -> bool {
        self.local_pages.is_some()
    }

    pub fn has_sg_table(&self) -> bool {
        self.sg_table.is_some()
    }

    pub fn handle_id(&self) -> Option<HandleId> {
        self.local_export_handle.map(|slot| slot.id)
    }

    pub fn consumer_count(&self) -> usize {
        self.local_export_handle.map_or(0, |slot| slot.consumers)
    }

    /// 現在の状態を導出
    pub fn state(&self) -> BufferState {
        match (self.valid, self.local_export_handle.is_some()) {
            (false, true) => BufferState::Zombie,
            (true, true) if self.imported => BufferState::Imported,
            (true, true) => BufferState::Exported,
            _ if self.local_pages.is_some() => BufferState::Mapped,
            _ => BufferState::Announced,
        }
    }

    /// どこからも参照されていないか（レジストリから削除すべきか）
    pub fn is_unreferenced(&self) -> bool {
        !self.valid && !self.imported && self.local_export_handle.is_none()
    }

    /// ハンドルがあればページもある
    pub fn holds_invariants(&self) -> bool {
        let handle_implies_pages =
            self.local_export_handle.is_none() || self.local_pages.is_some();
        let sg_implies_pages = self.sg_table.is_none() || self.local_pages.is_some();
        handle_implies_pages && sg_implies_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement() -> Announcement {
        Announcement {
            identity: BufferIdentity::new(7, [1, 2, 3]),
            remote_page_refs: alloc::vec![RemotePageRef::new(0x1000)],
            page_count: 2,
            head_offset: 0,
            tail_length: 16,
            private_data: Vec::new(),
        }
    }

    #[test]
    fn test_new_record_is_announced() {
        let record = BufferRecord::from_announcement(announcement());
        assert_eq!(record.state(), BufferState::Announced);
        assert!(record.is_valid());
        assert!(!record.is_imported());
        assert_eq!(record.byte_size(), 2 * PAGE_SIZE);
        assert!(record.holds_invariants());
    }

    #[test]
    fn test_zombie_state() {
        let mut record = BufferRecord::from_announcement(announcement());
        record.local_export_handle = Some(ExportSlot {
            id: HandleId::new(1),
            consumers: 1,
        });
        record.valid = false;
        assert_eq!(record.state(), BufferState::Zombie);
        // ページなしのハンドルは不変条件違反
        assert!(!record.holds_invariants());
    }
}

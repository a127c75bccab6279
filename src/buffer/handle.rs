// ============================================================================
// src/buffer/handle.rs - Local Sharable Handle
// ============================================================================
//!
//! # ローカルハンドルの所有権
//!
//! [`BufferHandle`] はローカルのコンシューマに渡される共有バッファへの
//! アクセス権。参照カウントはレコードの `ExportSlot` がサービスのロック下で
//! 保持するため、「最後の参照が消えた」判定と解放処理は不可分に行われる。
//!
//! ```text
//! import() ──> BufferHandle ──clone()──> BufferHandle
//!                   │                        │
//!                 drop()                   drop()  (最後の参照)
//!                   │                        │
//!                   v                        v
//!              consumers -= 1        on_handle_released()
//! ```

use super::id::BufferIdentity;
use crate::error::{ExportError, HdmaError, HdmaResult};
use crate::mm::SgTable;
use crate::service::Shared;
use alloc::sync::Arc;
use bitflags::bitflags;

/// 共有オブジェクトID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct HandleId(u64);

impl HandleId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

bitflags! {
    /// インポート時のフラグ（コンシューマ参照の属性）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImportFlags: u32 {
        /// 読み取り可能
        const READ = 1 << 0;
        /// 書き込み可能
        const WRITE = 1 << 1;
        /// exec時にクローズ
        const CLOEXEC = 1 << 2;

        /// 読み書き
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Default for ImportFlags {
    fn default() -> Self {
        Self::RW
    }
}

/// OS側のリソース共有機構（dma-buf相当）
///
/// `create` は1マッピングにつき高々1回、`attach` はインポートごとに呼ばれる。
pub trait ShareFacility: Send + Sync {
    /// 共有オブジェクトを作成
    fn create(&self, byte_size: usize) -> Result<HandleId, ExportError>;

    /// コンシューマ参照（fd相当）を割り当て
    fn attach(&self, handle: HandleId, flags: ImportFlags) -> Result<(), ExportError>;

    /// 共有オブジェクトを破棄
    fn destroy(&self, handle: HandleId);
}

/// ローカルコンシューマが保持するハンドル
pub struct BufferHandle {
    shared: Arc<Shared>,
    identity: BufferIdentity,
    id: HandleId,
}

impl BufferHandle {
    /// コンシューマ参照を1つ確保済みの状態で作成
    pub(crate) fn new(shared: Arc<Shared>, identity: BufferIdentity, id: HandleId) -> Self {
        Self {
            shared,
            identity,
            id,
        }
    }

    /// バッファIDを取得
    pub fn identity(&self) -> BufferIdentity {
        self.identity
    }

    /// 共有オブジェクトIDを取得
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// ハンドルのバイトサイズ（ページ数 * PAGE_SIZE）
    pub fn size(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .registry
            .find_by_identity(&self.identity)
            .map_or(0, |record| record.byte_size())
    }

    /// SGテーブルを構築（または再利用）して `f` に渡す
    ///
    /// `f` にはロック解放後の複製が渡される。
    pub fn map_dma<R, F>(&self, f: F) -> HdmaResult<R>
    where
        F: FnOnce(&SgTable) -> R,
    {
        let table = self.sg_table()?;
        Ok(f(&table))
    }

    /// SGテーブルの複製を取得
    pub fn sg_table(&self) -> HdmaResult<SgTable> {
        let mut state = self.shared.state.lock();
        let record = state
            .registry
            .find_by_identity_mut(&self.identity)
            .ok_or(HdmaError::NotFound)?;
        super::lifecycle::ensure_sg(record).cloned()
    }
}

impl Clone for BufferHandle {
    fn clone(&self) -> Self {
        {
            let mut state = self.shared.state.lock();
            let slot = state
                .registry
                .find_by_identity_mut(&self.identity)
                .and_then(|record| record.local_export_handle.as_mut());
            // 生存中のハンドルがあればスロットは必ず存在する
            debug_assert!(slot.is_some(), "clone of dangling handle {:?}", self.id);
            if let Some(slot) = slot {
                slot.consumers += 1;
            }
        }
        Self::new(self.shared.clone(), self.identity, self.id)
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.shared.release_consumer(self.identity, self.id);
    }
}

impl core::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("identity", &self.identity)
            .field("id", &self.id)
            .finish()
    }
}

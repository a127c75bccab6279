// ============================================================================
// src/backend/loopback.rs - In-process Loopback Backends
// ============================================================================
//!
//! ハイパーバイザを介さずに動作する外部プリミティブ。
//! 呼び出し回数を数え、任意の時点で失敗させることができる。

use crate::buffer::{BufferIdentity, HandleId, ImportFlags, ShareFacility};
use crate::domain::DomainId;
use crate::error::{ExportError, MapError};
use crate::ipc::{ControlKind, ControlTransport, TransportError};
use crate::mm::{Page, PageSequence, RemotePageMapper, RemotePageRef, PAGE_SIZE};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;
use x86_64::PhysAddr;

/// ループバックマッピングの物理アドレス基点
const LOOPBACK_PHYS_BASE: u64 = 0x4000_0000;

// ============================================================================
// Page Mapper
// ============================================================================

/// リモート参照をそのまま疑似物理アドレスに変換するマッパー
#[derive(Debug, Default)]
pub struct LoopbackMapper {
    map_calls: AtomicUsize,
    unmap_calls: AtomicUsize,
    live: AtomicUsize,
    fail: AtomicBool,
}

impl LoopbackMapper {
    pub const fn new() -> Self {
        Self {
            map_calls: AtomicUsize::new(0),
            unmap_calls: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// 以降のマップ要求を失敗させる
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// 成功したマップ回数
    pub fn map_calls(&self) -> usize {
        self.map_calls.load(Ordering::SeqCst)
    }

    pub fn unmap_calls(&self) -> usize {
        self.unmap_calls.load(Ordering::SeqCst)
    }

    /// 解放されていないマッピング数
    pub fn live_mappings(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl RemotePageMapper for LoopbackMapper {
    fn map_remote_pages(
        &self,
        domain: DomainId,
        refs: &[RemotePageRef],
        count: usize,
    ) -> Result<PageSequence, MapError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MapError::UnresolvedReference);
        }
        if refs.len() < count {
            return Err(MapError::ShortReferenceList);
        }

        let mut pages = Vec::new();
        pages
            .try_reserve_exact(count)
            .map_err(|_| MapError::OutOfAddressSpace)?;
        for r in &refs[..count] {
            let addr = r
                .as_u64()
                .checked_mul(PAGE_SIZE as u64)
                .and_then(|offset| offset.checked_add(LOOPBACK_PHYS_BASE))
                .and_then(|addr| PhysAddr::try_new(addr).ok())
                .ok_or(MapError::UnresolvedReference)?;
            pages.push(Page::new(addr));
        }

        self.map_calls.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(PageSequence::new(domain, pages))
    }

    fn unmap_remote_pages(&self, pages: PageSequence) {
        drop(pages);
        self.unmap_calls.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Share Facility
// ============================================================================

/// 共有オブジェクトの作成・割り当て・破棄を数えるだけの共有機構
#[derive(Debug)]
pub struct CountingFacility {
    next_id: AtomicU64,
    created: AtomicUsize,
    attached: AtomicUsize,
    destroyed: AtomicUsize,
    fail_create: AtomicBool,
    fail_attach: AtomicBool,
}

impl CountingFacility {
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            attached: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// 破棄されていない共有オブジェクト数
    pub fn live_objects(&self) -> usize {
        self.created() - self.destroyed()
    }
}

impl Default for CountingFacility {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareFacility for CountingFacility {
    fn create(&self, byte_size: usize) -> Result<HandleId, ExportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ExportError::CreateFailed);
        }
        if byte_size == 0 {
            return Err(ExportError::CreateFailed);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(HandleId::new(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn attach(&self, _handle: HandleId, _flags: ImportFlags) -> Result<(), ExportError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(ExportError::AttachFailed);
        }
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self, _handle: HandleId) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Control Transport
// ============================================================================

/// 送信された制御メッセージ
pub type SentControl = (DomainId, ControlKind, BufferIdentity);

/// 送信内容を記録するトランスポート
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentControl>>,
    attempts: AtomicUsize,
    fail: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub const fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: Mutex::new(None),
        }
    }

    /// 以降の送信を指定のエラーで失敗させる（`None` で解除）
    pub fn fail_with(&self, error: Option<TransportError>) {
        *self.fail.lock() = error;
    }

    /// 成功した送信の一覧
    pub fn sent(&self) -> Vec<SentControl> {
        self.sent.lock().clone()
    }

    /// 指定種別の送信成功数
    pub fn count(&self, kind: ControlKind) -> usize {
        self.sent.lock().iter().filter(|(_, k, _)| *k == kind).count()
    }

    /// 失敗も含めた送信試行数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ControlTransport for RecordingTransport {
    fn send_control(
        &self,
        target: DomainId,
        kind: ControlKind,
        identity: &BufferIdentity,
    ) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = *self.fail.lock() {
            return Err(error);
        }
        self.sent.lock().push((target, kind, *identity));
        Ok(())
    }
}

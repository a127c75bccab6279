// ============================================================================
// src/mm/page.rs - ローカルページとリモートページ参照
// ============================================================================
//!
//! リモートドメインのページ参照を、ローカルでアドレス可能なページ列に
//! 変換する外部プリミティブのインターフェース。
//!
//! 実際のマッピング（ハイパーバイザ経由のゲスト物理アドレス解決）は
//! このクレートの範囲外で、[`RemotePageMapper`] の実装者が担当する。

use crate::domain::DomainId;
use crate::error::MapError;
use alloc::vec::Vec;
use x86_64::PhysAddr;

/// ページサイズ
pub const PAGE_SIZE: usize = 4096;

/// リモートページ参照（エクスポート元が渡す不透明な値）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemotePageRef(u64);

impl RemotePageRef {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// ローカルにマップ済みの1ページ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 物理アドレス（DMAエンジン用）
    phys_addr: PhysAddr,
}

impl Page {
    /// 新しいページを作成
    pub fn new(phys_addr: PhysAddr) -> Self {
        Self { phys_addr }
    }

    /// 物理アドレスを取得
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys_addr
    }
}

/// マップ済みページ列
///
/// 所有権を持つ。解放は [`RemotePageMapper::unmap_remote_pages`] に
/// 渡すことでのみ行う。
#[derive(Debug)]
pub struct PageSequence {
    /// マッピング元のドメイン
    domain: DomainId,
    /// ページ列
    pages: Vec<Page>,
}

impl PageSequence {
    pub fn new(domain: DomainId, pages: Vec<Page>) -> Self {
        Self { domain, pages }
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// リモートページマッピングの外部プリミティブ
///
/// 呼び出しはサービスのロックを保持したまま行われる。
/// 実装はブロックしてもよいが、サービスへ再入してはならない。
pub trait RemotePageMapper: Send + Sync {
    /// リモート参照列を `count` 枚のローカルページへマップ
    fn map_remote_pages(
        &self,
        domain: DomainId,
        refs: &[RemotePageRef],
        count: usize,
    ) -> Result<PageSequence, MapError>;

    /// マップ済みページを解放
    fn unmap_remote_pages(&self, pages: PageSequence);
}

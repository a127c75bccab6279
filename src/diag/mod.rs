// ============================================================================
// src/diag/mod.rs - 診断・統計
// ============================================================================
//!
//! # 診断
//!
//! - [`SharedListReport`]: 共有中のバッファ一覧（ロック下で作成したスナップショット）
//! - [`Query`]: 個々のバッファの属性問い合わせ
//! - [`ServiceStats`]: 操作回数の統計（`stats` フィーチャ）

use crate::buffer::{BufferRecord, BufferRegistry};
use crate::domain::DomainId;
use crate::mm::PAGE_SIZE;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Shared List
// ============================================================================

/// 一覧の1行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedListEntry {
    /// エクスポート元
    pub origin: DomainId,
    pub sequence_id: u32,
    pub pages: usize,
    pub valid: bool,
    pub imported: bool,
}

impl SharedListEntry {
    fn from_record(record: &BufferRecord) -> Self {
        let identity = record.identity();
        Self {
            origin: identity.origin_domain(),
            sequence_id: identity.sequence_id(),
            pages: record.page_count(),
            valid: record.is_valid(),
            imported: record.is_imported(),
        }
    }
}

impl fmt::Display for SharedListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "SRC-VM:{} | id:{} | #pg:{} | valid:{} | imped?:{}",
            self.origin.as_u64(),
            self.sequence_id,
            self.pages,
            u8::from(self.valid),
            u8::from(self.imported)
        )
    }
}

/// 共有中のバッファ一覧
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharedListReport {
    pub entries: Vec<SharedListEntry>,
    pub total_pages: usize,
}

impl SharedListReport {
    /// レジストリから一覧を作成（sequence_id順）
    pub fn collect(registry: &BufferRegistry) -> Self {
        let mut entries = Vec::with_capacity(registry.len());
        registry.for_each(|record| entries.push(SharedListEntry::from_record(record)));
        entries.sort_by_key(|entry| (entry.sequence_id, entry.origin));

        let total_pages = entries.iter().map(|entry| entry.pages).sum();
        Self {
            entries,
            total_pages,
        }
    }

    /// 合計バイト数
    pub fn total_bytes(&self) -> usize {
        self.total_pages * PAGE_SIZE
    }
}

impl fmt::Display for SharedListReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{}", entry)?;
        }
        writeln!(
            f,
            "total num of pages: {} ({} Bytes)",
            self.total_pages,
            self.total_bytes()
        )
    }
}

// ============================================================================
// Query
// ============================================================================

/// バッファ属性の問い合わせ項目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// ハンドルのバイトサイズ
    Size,
    /// リモート側でまだ有効か
    Valid,
    /// 初回インポート通知を送信済みか
    Imported,
    /// プライベートデータのサイズ
    PrivateInfoSize,
    /// プライベートデータ本体
    PrivateInfo,
}

/// 問い合わせ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Size(usize),
    Flag(bool),
    Bytes(Vec<u8>),
}

impl Query {
    /// レコードに対して問い合わせを評価
    pub fn evaluate(self, record: &BufferRecord) -> QueryValue {
        match self {
            Query::Size => QueryValue::Size(record.byte_size()),
            Query::Valid => QueryValue::Flag(record.is_valid()),
            Query::Imported => QueryValue::Flag(record.is_imported()),
            Query::PrivateInfoSize => QueryValue::Size(record.private_data().len()),
            Query::PrivateInfo => QueryValue::Bytes(record.private_data().to_vec()),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// サービスの操作回数カウンタ
#[derive(Debug, Default)]
pub struct ServiceStats {
    announcements: AtomicU64,
    imports: AtomicU64,
    releases: AtomicU64,
    revocations: AtomicU64,
}

/// [`ServiceStats`] のスナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub announcements: u64,
    pub imports: u64,
    /// 最後のハンドル解放の回数
    pub releases: u64,
    pub revocations: u64,
    pub notify_failures: u64,
}

impl ServiceStats {
    pub const fn new() -> Self {
        Self {
            announcements: AtomicU64::new(0),
            imports: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            revocations: AtomicU64::new(0),
        }
    }

    pub fn record_announcement(&self) {
        self.announcements.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_import(&self) {
        self.imports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revocation(&self) {
        self.revocations.fetch_add(1, Ordering::Relaxed);
    }

    /// 現在値を取得（通知失敗数はゲートウェイから渡される）
    pub fn snapshot(&self, notify_failures: u64) -> StatsSnapshot {
        StatsSnapshot {
            announcements: self.announcements.load(Ordering::Relaxed),
            imports: self.imports.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            revocations: self.revocations.load(Ordering::Relaxed),
            notify_failures,
        }
    }
}

// ============================================================================
// src/mm/sg_table.rs - Scatter-Gather Table Builder
// ============================================================================
//!
//! 不連続なページ列を、1つの連続したDMAリソースとして見せるための
//! (ページ, 長さ, オフセット) セグメント列を構築する。
//!
//! ## レイアウト
//! ```text
//!  page 0         page 1 .. n-2      page n-1
//! +---+------+   +-----------+      +-------+---+
//! |   | data |   |   data    | ...  | data  |   |
//! +---+------+   +-----------+      +-------+---+
//!  ^head_offset                      ^tail_length
//! ```
//!
//! 1ページのみの場合は `PAGE_SIZE - head_offset` の1セグメントとなり、
//! `tail_length` は使われない。

use super::page::{Page, PAGE_SIZE};
use crate::error::{HdmaError, HdmaResult};
use alloc::vec::Vec;

/// Scatter-Gatherセグメント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgSegment {
    /// 対象ページ
    pub page: Page,
    /// セグメント長（バイト）
    pub length: usize,
    /// ページ内オフセット（バイト）
    pub offset: usize,
}

/// Scatter-Gatherテーブル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgTable {
    segments: Vec<SgSegment>,
}

impl SgTable {
    /// エントリ数を取得
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// セグメントのスライスを取得
    pub fn segments(&self) -> &[SgSegment] {
        &self.segments
    }

    /// 全セグメントの合計長
    pub fn total_length(&self) -> usize {
        self.segments.iter().map(|s| s.length).sum()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, SgSegment> {
        self.segments.iter()
    }
}

impl<'a> IntoIterator for &'a SgTable {
    type Item = &'a SgSegment;
    type IntoIter = core::slice::Iter<'a, SgSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

/// ページ列からSGテーブルを構築
///
/// 入力のみに依存する純粋関数。
pub fn build_sg(
    pages: &[Page],
    head_offset: usize,
    tail_length: usize,
    count: usize,
) -> HdmaResult<SgTable> {
    if count == 0 {
        return Err(HdmaError::InvalidArgument("page count is zero"));
    }
    if pages.len() < count {
        return Err(HdmaError::InvalidArgument("fewer pages than page count"));
    }
    if head_offset >= PAGE_SIZE {
        return Err(HdmaError::InvalidArgument("head offset beyond first page"));
    }

    let mut segments = Vec::new();
    segments
        .try_reserve_exact(count)
        .map_err(|_| HdmaError::AllocationFailure)?;

    segments.push(SgSegment {
        page: pages[0],
        length: PAGE_SIZE - head_offset,
        offset: head_offset,
    });

    if count > 1 {
        for &page in &pages[1..count - 1] {
            segments.push(SgSegment {
                page,
                length: PAGE_SIZE,
                offset: 0,
            });
        }

        segments.push(SgSegment {
            page: pages[count - 1],
            length: tail_length,
            offset: 0,
        });
    }

    Ok(SgTable { segments })
}

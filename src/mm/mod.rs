// ============================================================================
// src/mm/mod.rs - ページとScatter-Gatherテーブル
// ============================================================================
pub mod page;
pub mod sg_table;

pub use page::{Page, PageSequence, RemotePageMapper, RemotePageRef, PAGE_SIZE};
pub use sg_table::{SgSegment, SgTable, build_sg};

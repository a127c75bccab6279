// ============================================================================
// src/buffer/mod.rs - Shared Buffer Management
// ============================================================================
//!
//! ゲストがエクスポートしたバッファのレコード管理。
//!
//! ## 状態遷移
//! ```text
//!   announce
//!      │
//!      v
//!  Announced ──map──> Mapped ──export──> Exported ──notify──> Imported
//!      │                                    │                    │
//!   revoke                               revoke               revoke
//!      v                                    v                    v
//!   (削除)                               Zombie <────────────────┘
//!                                           │
//!                                   最後のハンドル解放
//!                                           v
//!                                        (削除)
//! ```

pub mod handle;
pub mod id;
pub mod import;
pub mod lifecycle;
pub mod record;
pub mod registry;

pub use handle::{BufferHandle, HandleId, ImportFlags, ShareFacility};
pub use id::BufferIdentity;
pub use lifecycle::{ReleaseOutcome, Revocation};
pub use record::{Announcement, BufferRecord, BufferState, ExportSlot};
pub use registry::{BufferRegistry, Visit};

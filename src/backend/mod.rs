// ============================================================================
// src/backend/mod.rs - Collaborator Backends
// ============================================================================
//!
//! 外部プリミティブ（ページマッパー・共有機構・トランスポート）の実装。
//!
//! - [`loopback`]: プロセス内で完結する実装（テスト・シミュレーション用）

pub mod loopback;

pub use loopback::{CountingFacility, LoopbackMapper, RecordingTransport};

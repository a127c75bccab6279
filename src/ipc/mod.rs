// ============================================================================
// src/ipc/mod.rs - Inter-domain Communication
// ============================================================================
//!
//! ゲストドメインとのメッセージ授受。
//!
//! - [`gateway`]: サービス → ゲストの制御通知
//! - [`session`]: ゲスト → サービスのメッセージ受信とローカルのインポート口

pub mod gateway;
pub mod session;

pub use gateway::{ControlKind, ControlTransport, NotificationGateway, TransportError};
pub use session::{Ack, AckStatus, GuestMessage, ImportSession, TransportSession};

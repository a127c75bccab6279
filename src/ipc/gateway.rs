// ============================================================================
// src/ipc/gateway.rs - Inter-domain Notification Gateway
// ============================================================================
//!
//! エクスポート元ドメインへの制御メッセージ送信。
//! プロトコル上の状態を持たない同期アダプタで、トランスポートのエラーを
//! [`GatewayError`] に変換するだけ。

use crate::buffer::BufferIdentity;
use crate::domain::DomainId;
use crate::error::GatewayError;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

/// 制御メッセージの種類（値はゲスト側のコマンド番号と一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlKind {
    /// 初回インポートの通知
    ImportNotify = 0x12,
    /// ローカルハンドル解放の通知
    ReleaseNotify = 0x13,
}

impl ControlKind {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

impl core::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ControlKind::ImportNotify => write!(f, "IMPORT_NOTIFY"),
            ControlKind::ReleaseNotify => write!(f, "DMABUF_REL"),
        }
    }
}

/// トランスポート層のエラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// 宛先ドメインが未接続
    Disconnected,
    /// 送信キューに空きがない
    QueueFull,
    /// 応答待ちがタイムアウト
    TimedOut,
    /// 相手側がエラー応答を返した
    Nack,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Disconnected => write!(f, "peer disconnected"),
            TransportError::QueueFull => write!(f, "send queue full"),
            TransportError::TimedOut => write!(f, "timed out"),
            TransportError::Nack => write!(f, "negative acknowledgement"),
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Disconnected => GatewayError::NoConnection,
            TransportError::QueueFull => GatewayError::Busy,
            TransportError::TimedOut => GatewayError::Timeout,
            TransportError::Nack => GatewayError::Rejected,
        }
    }
}

/// ドメイン間コントロールチャネルの外部プリミティブ
///
/// サービスのロックを保持したまま呼ばれる。
pub trait ControlTransport: Send + Sync {
    fn send_control(
        &self,
        target: DomainId,
        kind: ControlKind,
        identity: &BufferIdentity,
    ) -> Result<(), TransportError>;
}

/// 通知ゲートウェイ
pub struct NotificationGateway {
    transport: Arc<dyn ControlTransport>,
    /// 送信失敗の累計
    failures: AtomicU64,
}

impl NotificationGateway {
    pub fn new(transport: Arc<dyn ControlTransport>) -> Self {
        Self {
            transport,
            failures: AtomicU64::new(0),
        }
    }

    /// 送信に失敗した通知の数
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// 制御メッセージを送信
    pub fn notify(
        &self,
        target: DomainId,
        kind: ControlKind,
        identity: &BufferIdentity,
    ) -> Result<(), GatewayError> {
        #[cfg(feature = "verbose_logging")]
        log::trace!(target: "hdma", "send {} for {} to {}", kind, identity, target);

        self.transport
            .send_control(target, kind, identity)
            .map_err(|e| {
                self.failures.fetch_add(1, Ordering::Relaxed);
                GatewayError::from(e)
            })
    }
}

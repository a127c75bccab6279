// ============================================================================
// src/ipc/session.rs - Guest Transport & Local Import Sessions
// ============================================================================
//!
//! サービスへの2種類の入口。
//!
//! - [`TransportSession`]: ゲスト接続1本ごとのメッセージ受信口
//! - [`ImportSession`]: ローカルのインポート要求・問い合わせ口
//!
//! セッションは作成元の [`crate::HdmaService`] と状態を共有する。

use crate::buffer::{Announcement, BufferHandle, BufferIdentity, ImportFlags};
use crate::diag::{Query, QueryValue, SharedListReport};
use crate::domain::DomainId;
use crate::error::{HdmaError, HdmaResult};
use crate::service::Shared;
use alloc::sync::Arc;
use log::{error, info};

/// ゲストから届くメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestMessage {
    /// 自ドメインのIDの問い合わせ
    NeedVmid,
    /// バッファのエクスポート（ページ数0はプライベートデータの再同期）
    Export(Announcement),
    /// バッファの無効化
    NotifyUnexport(BufferIdentity),
}

impl GuestMessage {
    /// コマンド番号
    pub const fn command(&self) -> u32 {
        match self {
            GuestMessage::NeedVmid => 0x01,
            GuestMessage::Export(_) => 0x10,
            GuestMessage::NotifyUnexport(_) => 0x11,
        }
    }
}

/// 応答ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Processed,
    Error,
}

/// ゲストへの応答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: AckStatus,
    /// `NeedVmid` への応答のみ値を持つ
    pub vmid: Option<DomainId>,
}

impl Ack {
    pub const fn processed() -> Self {
        Self {
            status: AckStatus::Processed,
            vmid: None,
        }
    }

    pub const fn error() -> Self {
        Self {
            status: AckStatus::Error,
            vmid: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == AckStatus::Processed
    }
}

/// ゲスト接続1本分のセッション
///
/// 破棄時に接続を解除する。
pub struct TransportSession {
    shared: Arc<Shared>,
    domain: DomainId,
}

impl TransportSession {
    pub(crate) fn new(shared: Arc<Shared>, domain: DomainId) -> Self {
        Self { shared, domain }
    }

    /// 接続先ドメイン
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// ゲストメッセージを処理して応答を返す
    pub fn handle(&self, message: GuestMessage) -> Ack {
        let command = message.command();
        let result = self.dispatch(message);

        self.shared
            .state
            .lock()
            .connections
            .record_message(self.domain, result.is_ok());

        match result {
            Ok(ack) => ack,
            Err(e) => {
                error!(
                    target: "hdma",
                    "msg parse error from {}: cmd {:#x}: {}",
                    self.domain,
                    command,
                    e
                );
                Ack::error()
            }
        }
    }

    fn dispatch(&self, message: GuestMessage) -> HdmaResult<Ack> {
        match message {
            GuestMessage::NeedVmid => Ok(Ack {
                status: AckStatus::Processed,
                vmid: Some(self.domain),
            }),
            GuestMessage::Export(announcement) => {
                self.check_owner(&announcement.identity)?;
                self.shared.announce(announcement)?;
                Ok(Ack::processed())
            }
            GuestMessage::NotifyUnexport(identity) => {
                self.check_owner(&identity)?;
                self.shared.revoke(&identity)?;
                Ok(Ack::processed())
            }
        }
    }

    /// 他ドメインが所有するIDの操作を拒否
    fn check_owner(&self, identity: &BufferIdentity) -> HdmaResult<()> {
        let origin = identity.origin_domain().as_u64();
        let own = self.domain.as_u64() & u64::from(crate::buffer::id::DOMAIN_MASK);
        if origin == own {
            Ok(())
        } else {
            Err(HdmaError::AccessDenied)
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self
            .shared
            .state
            .lock()
            .connections
            .disconnect(self.domain)
            .is_some()
        {
            info!(target: "hdma", "{} disconnected", self.domain);
        }
    }
}

impl core::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransportSession")
            .field("domain", &self.domain)
            .finish()
    }
}

/// ローカルのインポート要求用セッション
#[derive(Clone)]
pub struct ImportSession {
    shared: Arc<Shared>,
}

impl ImportSession {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// バッファをインポート
    pub fn import(&self, identity: BufferIdentity, flags: ImportFlags) -> HdmaResult<BufferHandle> {
        crate::buffer::import::import(&self.shared, identity, flags)
    }

    /// バッファの属性を問い合わせ
    pub fn query(&self, identity: &BufferIdentity, query: Query) -> HdmaResult<QueryValue> {
        self.shared.query(identity, query)
    }

    /// 共有中のバッファ一覧
    pub fn shared_list(&self) -> SharedListReport {
        self.shared.shared_list()
    }
}

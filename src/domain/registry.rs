// ============================================================================
// src/domain/registry.rs - Guest Connection Registry
// ゲストドメインごとのトランスポート接続を管理
// ============================================================================

use super::DomainId;
use crate::error::{HdmaError, HdmaResult};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// ゲスト接続の情報
#[derive(Debug, Clone)]
pub struct GuestConnection {
    /// 接続先ドメインID
    pub domain: DomainId,
    /// 統計: 処理したメッセージ数
    pub messages_handled: u64,
    /// 統計: エラー応答を返したメッセージ数
    pub messages_rejected: u64,
}

impl GuestConnection {
    /// 新しい接続を作成
    pub fn new(domain: DomainId) -> Self {
        Self {
            domain,
            messages_handled: 0,
            messages_rejected: 0,
        }
    }
}

/// 接続レジストリ
/// 接続中のゲストドメインを管理（ゲスト1つにつき接続は1つ）
pub struct ConnectionRegistry {
    /// ドメインID -> 接続のマッピング
    connections: BTreeMap<DomainId, GuestConnection>,
}

impl ConnectionRegistry {
    /// 新しいレジストリを作成
    pub const fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
        }
    }

    /// 接続を登録
    pub fn connect(&mut self, domain: DomainId) -> HdmaResult<()> {
        if self.connections.contains_key(&domain) {
            return Err(HdmaError::AlreadyExists);
        }
        self.connections.insert(domain, GuestConnection::new(domain));
        Ok(())
    }

    /// 接続を削除
    pub fn disconnect(&mut self, domain: DomainId) -> Option<GuestConnection> {
        self.connections.remove(&domain)
    }

    /// 接続を取得
    pub fn get(&self, domain: DomainId) -> Option<&GuestConnection> {
        self.connections.get(&domain)
    }

    /// メッセージ処理結果を記録
    pub fn record_message(&mut self, domain: DomainId, accepted: bool) {
        if let Some(conn) = self.connections.get_mut(&domain) {
            conn.messages_handled += 1;
            if !accepted {
                conn.messages_rejected += 1;
            }
        }
    }

    /// 接続中のドメインを列挙
    pub fn domains(&self) -> Vec<DomainId> {
        self.connections.keys().copied().collect()
    }

    /// 接続数を取得
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

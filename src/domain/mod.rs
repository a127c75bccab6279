// ============================================================================
// src/domain/mod.rs - Domain identification & guest connections
// ============================================================================
pub mod registry;

pub use registry::{ConnectionRegistry, GuestConnection};

/// ドメインを一意に識別するID
///
/// サービスドメイン・ゲストドメインの区別はしない。
/// バッファIDに埋め込まれるのは下位8ビットのみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(u64);

impl DomainId {
    /// サービスドメイン（常にID=0）
    pub const SERVICE: DomainId = DomainId(0);

    /// 新しいドメインIDを作成
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// IDを数値として取得
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for DomainId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Domain({})", self.0)
    }
}

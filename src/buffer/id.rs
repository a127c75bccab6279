// ============================================================================
// src/buffer/id.rs - Buffer Identity
// ============================================================================
//!
//! バッファIDは `sequence_id` と12バイトの乱数キーで構成される。
//! 乱数キーは、他ドメインがエクスポートしたIDを連番から推測できないように
//! するためのもの（性能上のキーではなく信頼境界）。
//!
//! ```text
//!  sequence_id (32bit)
//! +--------+------------------------+
//! | domain |        counter         |
//! +--------+------------------------+
//!  31    24 23                     0
//! ```

use crate::domain::DomainId;
use core::hash::{Hash, Hasher};

/// sequence_id内のドメイン番号の位置
pub const DOMAIN_SHIFT: u32 = 24;

/// ドメイン番号のマスク
pub const DOMAIN_MASK: u32 = 0xFF;

/// カウンタ部分のマスク
pub const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// 共有バッファの複合ID
///
/// 等価性は `sequence_id` と3つのキーワード全ての一致で判定する。
/// ハッシュは `sequence_id` のみを使用し、衝突時は全フィールドで比較される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferIdentity {
    sequence_id: u32,
    random_key: [u32; 3],
}

impl BufferIdentity {
    /// 無効なID（検索失敗時の番兵）
    pub const INVALID: BufferIdentity = BufferIdentity {
        sequence_id: u32::MAX,
        random_key: [0; 3],
    };

    /// 生の値からIDを作成
    pub const fn new(sequence_id: u32, random_key: [u32; 3]) -> Self {
        Self {
            sequence_id,
            random_key,
        }
    }

    /// ドメイン番号とカウンタからIDを組み立てる
    pub const fn compose(domain: DomainId, counter: u32, random_key: [u32; 3]) -> Self {
        let sequence_id =
            (((domain.as_u64() as u32) & DOMAIN_MASK) << DOMAIN_SHIFT) | (counter & COUNTER_MASK);
        Self::new(sequence_id, random_key)
    }

    pub const fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub const fn random_key(&self) -> [u32; 3] {
        self.random_key
    }

    /// エクスポート元ドメイン（sequence_idの上位ビットから導出）
    pub const fn origin_domain(&self) -> DomainId {
        DomainId::new(((self.sequence_id >> DOMAIN_SHIFT) & DOMAIN_MASK) as u64)
    }

    /// カウンタ部分
    pub const fn counter(&self) -> u32 {
        self.sequence_id & COUNTER_MASK
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Hash for BufferIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sequence_id.hash(state);
    }
}

impl core::fmt::Display for BufferIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "hid({}:{:#08x})",
            self.origin_domain().as_u64(),
            self.counter()
        )
    }
}

// ============================================================================
// src/config.rs - サービス設定
// ============================================================================

/// 同時に共有できるバッファ数の既定値（元の2^7バケットのテーブルに相当）
pub const DEFAULT_MAX_BUFFERS: usize = 128;

/// プライベートデータの最大サイズ（バイト）
pub const MAX_SIZE_PRIV_DATA: usize = 192;

/// サービス設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdmaConfig {
    /// レジストリに登録できるバッファの最大数
    pub max_buffers: usize,
    /// アナウンスに添付できるプライベートデータの最大サイズ
    pub max_private_data: usize,
    /// 初回インポート時にエクスポート元へ通知するか
    pub notify_on_import: bool,
}

impl Default for HdmaConfig {
    fn default() -> Self {
        Self {
            max_buffers: DEFAULT_MAX_BUFFERS,
            max_private_data: MAX_SIZE_PRIV_DATA,
            notify_on_import: true,
        }
    }
}

impl HdmaConfig {
    /// 最大バッファ数を設定
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// プライベートデータの上限を設定
    pub fn with_max_private_data(mut self, max_private_data: usize) -> Self {
        self.max_private_data = max_private_data;
        self
    }

    /// インポート通知の有無を設定
    pub fn with_notify_on_import(mut self, notify: bool) -> Self {
        self.notify_on_import = notify;
        self
    }
}

//! 統一エラーハンドリングモジュール
//!
//! クレート全体で使用される統一エラー型を定義し、
//! 各協調コンポーネント（マッパー・共有機構・トランスポート）の
//! エラーから変換を提供します。

use core::fmt;

/// クレート全体の統一エラー型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HdmaError {
    /// IDが未登録、または既に無効化されている
    NotFound,
    /// 同一IDのバッファが既に登録済み
    AlreadyExists,
    /// レジストリがいっぱい
    RegistryFull,
    /// リモートページのマッピング失敗
    MapFailure(MapError),
    /// ローカルハンドルの生成失敗
    ExportFailure(ExportError),
    /// ドメイン間通知の失敗
    GatewayFailure(GatewayError),
    /// SGテーブル用メモリの確保失敗
    AllocationFailure,
    /// 無効な引数
    InvalidArgument(&'static str),
    /// 他ドメインのバッファに対する操作
    AccessDenied,
}

/// マッピング関連エラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// リモート参照の解決に失敗
    UnresolvedReference,
    /// ローカルアドレス空間が不足
    OutOfAddressSpace,
    /// 参照数がページ数に足りない
    ShortReferenceList,
}

/// エクスポート関連エラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportError {
    /// 共有オブジェクトの作成失敗
    CreateFailed,
    /// コンシューマ参照（fd相当）の割り当て失敗
    AttachFailed,
    /// リソースが枯渇
    ResourceExhausted,
}

/// 通知ゲートウェイ関連エラーの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    /// 宛先ドメインとの接続がない
    NoConnection,
    /// 送信コンテナが空いていない
    Busy,
    /// 応答がタイムアウト
    Timeout,
    /// 相手側がエラー応答を返した
    Rejected,
}

// ===== Display implementations =====

impl fmt::Display for HdmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HdmaError::NotFound => write!(f, "no valid buffer found"),
            HdmaError::AlreadyExists => write!(f, "buffer already registered"),
            HdmaError::RegistryFull => write!(f, "buffer registry full"),
            HdmaError::MapFailure(e) => write!(f, "Map error: {}", e),
            HdmaError::ExportFailure(e) => write!(f, "Export error: {}", e),
            HdmaError::GatewayFailure(e) => write!(f, "Gateway error: {}", e),
            HdmaError::AllocationFailure => write!(f, "SG table allocation failed"),
            HdmaError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            HdmaError::AccessDenied => write!(f, "access denied"),
        }
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::UnresolvedReference => write!(f, "failed to map remote pages"),
            MapError::OutOfAddressSpace => write!(f, "out of address space"),
            MapError::ShortReferenceList => write!(f, "reference list shorter than page count"),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::CreateFailed => write!(f, "failed to create sharable object"),
            ExportError::AttachFailed => write!(f, "failed to get file descriptor"),
            ExportError::ResourceExhausted => write!(f, "resource exhausted"),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NoConnection => write!(f, "no connection to domain"),
            GatewayError::Busy => write!(f, "no more container"),
            GatewayError::Timeout => write!(f, "request time-out"),
            GatewayError::Rejected => write!(f, "request rejected"),
        }
    }
}

// ===== From implementations for sub-errors =====

impl From<MapError> for HdmaError {
    fn from(e: MapError) -> Self {
        HdmaError::MapFailure(e)
    }
}

impl From<ExportError> for HdmaError {
    fn from(e: ExportError) -> Self {
        HdmaError::ExportFailure(e)
    }
}

impl From<GatewayError> for HdmaError {
    fn from(e: GatewayError) -> Self {
        HdmaError::GatewayFailure(e)
    }
}

// ===== Result type alias =====

/// クレートの結果型エイリアス
pub type HdmaResult<T> = Result<T, HdmaError>;

// ===== Error extension trait =====

/// エラーに追加情報を付加するためのトレイト
pub trait ErrorContext<T> {
    /// エラーにコンテキスト情報を追加
    fn context(self, ctx: &'static str) -> Result<T, ContextualError>;
}

/// コンテキスト付きエラー
#[derive(Debug)]
pub struct ContextualError {
    pub error: HdmaError,
    pub context: &'static str,
}

impl<T, E: Into<HdmaError>> ErrorContext<T> for Result<T, E> {
    fn context(self, ctx: &'static str) -> Result<T, ContextualError> {
        self.map_err(|e| ContextualError {
            error: e.into(),
            context: ctx,
        })
    }
}

impl fmt::Display for ContextualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

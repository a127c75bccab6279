// ============================================================================
// src/lib.rs - Hyper DMA-BUF Service Core
// サービスドメイン側: ゲストがエクスポートしたバッファのゼロコピーインポート
// ============================================================================
//!
//! # 概要
//!
//! ゲストドメインがエクスポートしたページバッファを、サービスドメイン内の
//! ローカルハンドルとしてコピーなしで公開する。
//!
//! ## 構成（葉から順に）
//! - [`buffer::registry`]: 複合キーによるバッファ識別レジストリ
//! - [`mm::sg_table`]: Scatter-Gather テーブル構築
//! - [`buffer::lifecycle`]: バッファ状態機械
//! - [`buffer::import`]: インポート手順とロールバック
//! - [`ipc::gateway`]: ドメイン間通知ゲートウェイ
//!
//! 全ての操作は明示的に構築された [`HdmaService`] を経由する。
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backend;
pub mod buffer;
pub mod config;
pub mod diag;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod mm;
pub mod service;

pub use buffer::{
    Announcement, BufferHandle, BufferIdentity, BufferRecord, BufferRegistry, BufferState,
    HandleId, ImportFlags, Revocation, ShareFacility,
};
pub use config::HdmaConfig;
pub use diag::{Query, QueryValue, SharedListEntry, SharedListReport, StatsSnapshot};
pub use domain::DomainId;
pub use error::{ExportError, GatewayError, HdmaError, HdmaResult, MapError};
pub use ipc::{
    Ack, AckStatus, ControlKind, ControlTransport, GuestMessage, ImportSession,
    NotificationGateway, TransportError, TransportSession,
};
pub use mm::{Page, PageSequence, RemotePageMapper, RemotePageRef, SgSegment, SgTable, PAGE_SIZE};
pub use service::HdmaService;

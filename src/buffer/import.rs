// ============================================================================
// src/buffer/import.rs - Import Orchestrator
// ============================================================================
//!
//! ローカルのインポート要求を処理する。
//!
//! 手順（全てサービスのロック下）:
//! 1. IDで有効なレコードを検索
//! 2. 未マップならリモートページをマップ
//! 3. ローカルハンドルをエクスポート（失敗時はロールバック）
//! 4. 初回ならエクスポート元へインポート通知
//!
//! 通知の失敗はインポートの失敗にはならない。

use super::handle::{BufferHandle, HandleId, ImportFlags, ShareFacility};
use super::id::BufferIdentity;
use super::lifecycle;
use super::registry::BufferRegistry;
use crate::error::{ErrorContext, HdmaError, HdmaResult};
use crate::ipc::{ControlKind, NotificationGateway};
use crate::mm::RemotePageMapper;
use crate::service::Shared;
use alloc::sync::Arc;
use log::{error, warn};

/// バッファをインポートしてハンドルを返す
///
/// ハンドルはロックを解放してから作成する（参照数は確保済み）。
pub(crate) fn import(
    shared: &Arc<Shared>,
    identity: BufferIdentity,
    flags: ImportFlags,
) -> HdmaResult<BufferHandle> {
    let handle = {
        let mut state = shared.state.lock();
        import_locked(
            &mut state.registry,
            &identity,
            flags,
            &*shared.mapper,
            &*shared.facility,
            &shared.gateway,
            shared.config.notify_on_import,
        )?
    };

    #[cfg(feature = "stats")]
    shared.stats.record_import();

    Ok(BufferHandle::new(shared.clone(), identity, handle))
}

/// ロック保持中のインポート本体
///
/// 確保した参照数は呼び出し側が [`BufferHandle`] に渡す。
pub(crate) fn import_locked(
    registry: &mut BufferRegistry,
    identity: &BufferIdentity,
    flags: ImportFlags,
    mapper: &dyn RemotePageMapper,
    facility: &dyn ShareFacility,
    gateway: &NotificationGateway,
    notify_on_import: bool,
) -> HdmaResult<HandleId> {
    let record = match registry.find_by_identity_mut(identity) {
        Some(record) if record.is_valid() => record,
        _ => {
            error!(target: "hdma", "no valid buffer found for {}", identity);
            return Err(HdmaError::NotFound);
        }
    };

    if let Err(e) = lifecycle::ensure_mapped(record, mapper) {
        error!(target: "hdma", "failed to map pages of {}: {}", identity, e);
        return Err(e);
    }

    let handle = match lifecycle::export_local_handle(record, facility, flags) {
        Ok(handle) => handle,
        Err(e) => {
            error!(target: "hdma", "failed to export {}: {}", identity, e);
            rollback_export(registry, identity, mapper);
            return Err(e);
        }
    };

    if notify_on_import && !record.imported {
        match gateway
            .notify(identity.origin_domain(), ControlKind::ImportNotify, identity)
            .context("import notification")
        {
            Ok(()) => record.imported = true,
            Err(e) => warn!(target: "hdma", "{} ({})", e, identity),
        }
    }

    #[cfg(feature = "verbose_logging")]
    log::trace!(
        target: "hdma",
        "imported {} as {:?} ({} consumers)",
        identity,
        handle,
        record.consumer_count()
    );

    Ok(handle)
}

/// エクスポート失敗時の後始末
///
/// 他のコンシューマがマッピングに依存していなければページを解放し、
/// どこからも参照されないレコードは削除する。
fn rollback_export(
    registry: &mut BufferRegistry,
    identity: &BufferIdentity,
    mapper: &dyn RemotePageMapper,
) {
    let Some(record) = registry.find_by_identity_mut(identity) else {
        return;
    };

    if !record.imported && record.local_export_handle.is_none() {
        lifecycle::unmap(record, mapper);
    }

    if record.is_unreferenced() {
        let _ = registry.remove(identity);
    }
}

// ============================================================================
// src/buffer/lifecycle.rs - Buffer Lifecycle Manager
// ============================================================================
//!
//! レコードの可変フィールドに対する遷移関数群。
//! 全ての関数は呼び出し側がサービスのロックを保持していることを前提とする。
//!
//! 不変条件:
//! - ハンドルがあればページもある
//! - SGテーブルがあればページもある
//! - `valid == false` かつハンドルなしのレコードはレジストリに残らない

use super::handle::{HandleId, ImportFlags, ShareFacility};
use super::id::BufferIdentity;
use super::record::{BufferRecord, ExportSlot};
use super::registry::BufferRegistry;
use crate::error::{ErrorContext, HdmaError, HdmaResult, MapError};
use crate::ipc::{ControlKind, NotificationGateway};
use crate::mm::{build_sg, RemotePageMapper, SgTable};
use alloc::vec::Vec;
use log::{info, warn};

/// コンシューマ参照を1つ解放した結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// まだ参照が残っている
    Pending(usize),
    /// 最後の参照が解放され、レコードは休眠状態で残った
    Dormant,
    /// 最後の参照が解放され、レコードも削除された
    Freed,
    /// 対応するレコード・ハンドルが見つからない
    Stale,
}

/// 無効化の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    /// ハンドルが残っているため、最後の解放まで保持
    Zombie,
    /// 即座に解放された
    Freed,
}

/// リモートページをマップ（マップ済みなら何もしない）
pub fn ensure_mapped(record: &mut BufferRecord, mapper: &dyn RemotePageMapper) -> HdmaResult<()> {
    if record.local_pages.is_some() {
        return Ok(());
    }

    let pages = mapper.map_remote_pages(
        record.identity().origin_domain(),
        record.remote_page_refs(),
        record.page_count(),
    )?;

    if pages.len() < record.page_count() {
        mapper.unmap_remote_pages(pages);
        return Err(MapError::ShortReferenceList.into());
    }

    #[cfg(feature = "verbose_logging")]
    log::trace!(target: "hdma", "mapped {} pages for {}", pages.len(), record.identity());

    record.local_pages = Some(pages);
    Ok(())
}

/// SGテーブルを取得（未構築なら構築してキャッシュ）
pub fn ensure_sg(record: &mut BufferRecord) -> HdmaResult<&SgTable> {
    if record.sg_table.is_none() {
        let pages = record
            .local_pages
            .as_ref()
            .ok_or(HdmaError::InvalidArgument("buffer is not mapped"))?;
        let sgt = build_sg(
            pages.pages(),
            record.head_offset(),
            record.tail_length(),
            record.page_count(),
        )?;
        record.sg_table = Some(sgt);
    }
    record.sg_table.as_ref().ok_or(HdmaError::AllocationFailure)
}

/// ローカルハンドルをエクスポートし、コンシューマ参照を1つ追加
///
/// 共有オブジェクトの作成はマッピングごとに1回だけ。
pub fn export_local_handle(
    record: &mut BufferRecord,
    facility: &dyn ShareFacility,
    flags: ImportFlags,
) -> HdmaResult<HandleId> {
    if record.local_pages.is_none() {
        return Err(HdmaError::InvalidArgument("buffer is not mapped"));
    }

    if let Some(slot) = record.local_export_handle.as_mut() {
        facility.attach(slot.id, flags)?;
        slot.consumers += 1;
        return Ok(slot.id);
    }

    let id = facility.create(record.byte_size())?;
    if let Err(e) = facility.attach(id, flags) {
        facility.destroy(id);
        return Err(e.into());
    }
    record.local_export_handle = Some(ExportSlot { id, consumers: 1 });
    Ok(id)
}

/// ページとSGテーブルを解放
pub fn unmap(record: &mut BufferRecord, mapper: &dyn RemotePageMapper) {
    record.sg_table = None;
    if let Some(pages) = record.local_pages.take() {
        mapper.unmap_remote_pages(pages);
    }
}

/// コンシューマ参照を1つ解放。最後の参照なら [`on_handle_released`] を実行する。
pub fn release_consumer(
    registry: &mut BufferRegistry,
    id: &BufferIdentity,
    handle: HandleId,
    mapper: &dyn RemotePageMapper,
    facility: &dyn ShareFacility,
    gateway: &NotificationGateway,
) -> ReleaseOutcome {
    let remaining = match registry
        .find_by_identity_mut(id)
        .and_then(|record| record.local_export_handle.as_mut())
    {
        Some(slot) if slot.id == handle => {
            slot.consumers = slot.consumers.saturating_sub(1);
            slot.consumers
        }
        _ => {
            warn!(target: "hdma", "release of unknown handle {:?} for {}", handle, id);
            return ReleaseOutcome::Stale;
        }
    };

    if remaining > 0 {
        return ReleaseOutcome::Pending(remaining);
    }
    on_handle_released(registry, id, mapper, facility, gateway)
}

/// 最後のコンシューマ参照が解放された時の後始末
///
/// ページを解放し、エクスポート元に解放を通知する。無効化済みのレコードは削除する。
pub fn on_handle_released(
    registry: &mut BufferRegistry,
    id: &BufferIdentity,
    mapper: &dyn RemotePageMapper,
    facility: &dyn ShareFacility,
    gateway: &NotificationGateway,
) -> ReleaseOutcome {
    let Some(record) = registry.find_by_identity_mut(id) else {
        return ReleaseOutcome::Stale;
    };

    let slot = record.local_export_handle.take();
    unmap(record, mapper);
    if let Some(slot) = slot {
        facility.destroy(slot.id);
    }
    record.imported = false;
    let valid = record.valid;

    if let Err(e) = gateway
        .notify(id.origin_domain(), ControlKind::ReleaseNotify, id)
        .context("release notification")
    {
        warn!(target: "hdma", "{} ({})", e, id);
    }

    if valid {
        return ReleaseOutcome::Dormant;
    }
    if registry.remove(id).is_ok() {
        info!(target: "hdma", "freeing revoked buffer {}", id);
    }
    ReleaseOutcome::Freed
}

/// エクスポート元によるバッファの無効化
pub fn revoke(
    registry: &mut BufferRegistry,
    id: &BufferIdentity,
    mapper: &dyn RemotePageMapper,
) -> HdmaResult<Revocation> {
    let record = registry.find_by_identity_mut(id).ok_or(HdmaError::NotFound)?;
    if record.local_export_handle.is_some() {
        record.valid = false;
        return Ok(Revocation::Zombie);
    }

    let mut record = registry.remove(id)?;
    unmap(&mut record, mapper);
    Ok(Revocation::Freed)
}

/// プライベートデータを更新（ページ数0のエクスポート通知）
pub fn update_private_data(
    record: &mut BufferRecord,
    data: Vec<u8>,
    limit: usize,
) -> HdmaResult<()> {
    if data.len() > limit {
        return Err(HdmaError::InvalidArgument("private data too large"));
    }
    record.set_private_data(data);
    Ok(())
}

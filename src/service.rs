// ============================================================================
// src/service.rs - Service Context
// ============================================================================
//!
//! サービス全体の状態を保持するコンテキスト。
//!
//! グローバル状態は持たない。埋め込み側が [`HdmaService::new`] で
//! 外部プリミティブを渡して構築し、セッションとハンドルはこの
//! コンテキストを共有する。
//!
//! ## ロック
//! レジストリと接続表は単一の `spin::Mutex` で保護される。
//! マッピング・通知はこのロックを保持したまま行われる。
//! 呼び出し側のクロージャはロック外で実行される。

use crate::buffer::{
    import, lifecycle, Announcement, BufferHandle, BufferIdentity, BufferRecord, BufferRegistry,
    HandleId, ImportFlags, ReleaseOutcome, Revocation, ShareFacility, Visit,
};
use crate::config::HdmaConfig;
use crate::diag::{Query, QueryValue, SharedListReport};
use crate::domain::{ConnectionRegistry, DomainId};
use crate::error::{HdmaError, HdmaResult};
use crate::ipc::{ControlTransport, ImportSession, NotificationGateway, TransportSession};
use crate::mm::{RemotePageMapper, PAGE_SIZE};
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{error, info};
use spin::Mutex;

#[cfg(feature = "stats")]
use crate::diag::{ServiceStats, StatsSnapshot};

/// ロックで保護される状態
pub(crate) struct ServiceState {
    pub(crate) registry: BufferRegistry,
    pub(crate) connections: ConnectionRegistry,
}

/// サービス・セッション・ハンドルが共有する中身
pub(crate) struct Shared {
    pub(crate) state: Mutex<ServiceState>,
    pub(crate) mapper: Arc<dyn RemotePageMapper>,
    pub(crate) facility: Arc<dyn ShareFacility>,
    pub(crate) gateway: NotificationGateway,
    pub(crate) config: HdmaConfig,
    #[cfg(feature = "stats")]
    pub(crate) stats: ServiceStats,
}

impl Shared {
    /// ゲストからのエクスポート通知を登録
    ///
    /// ページ数0の場合は既存レコードのプライベートデータのみ更新する。
    pub(crate) fn announce(&self, announcement: Announcement) -> HdmaResult<()> {
        validate(&announcement, &self.config)?;

        let identity = announcement.identity;
        let mut state = self.state.lock();

        if announcement.page_count == 0 {
            let record = state
                .registry
                .find_by_identity_mut(&identity)
                .ok_or(HdmaError::NotFound)?;
            lifecycle::update_private_data(
                record,
                announcement.private_data,
                self.config.max_private_data,
            )?;
            info!(target: "hdma", "private data of {} updated", identity);
            return Ok(());
        }

        let pages = announcement.page_count;
        if let Err(e) = state
            .registry
            .insert(BufferRecord::from_announcement(announcement))
        {
            error!(target: "hdma", "failed to register {}: {}", identity, e);
            return Err(e);
        }

        #[cfg(feature = "stats")]
        self.stats.record_announcement();

        info!(
            target: "hdma",
            "registered {} ({} pages, {} Bytes)",
            identity,
            pages,
            pages * PAGE_SIZE
        );
        Ok(())
    }

    /// エクスポート元によるバッファの無効化
    pub(crate) fn revoke(&self, identity: &BufferIdentity) -> HdmaResult<Revocation> {
        let mut state = self.state.lock();
        let result = lifecycle::revoke(&mut state.registry, identity, &*self.mapper);
        match result {
            Ok(Revocation::Freed) => {
                info!(target: "hdma", "now freeing buffer {}", identity);
            }
            Ok(Revocation::Zombie) => {
                info!(target: "hdma", "{} revoked while in use", identity);
            }
            Err(ref e) => {
                error!(target: "hdma", "can't find buffer {}: {}", identity, e);
            }
        }

        #[cfg(feature = "stats")]
        if result.is_ok() {
            self.stats.record_revocation();
        }

        result
    }

    /// コンシューマ参照を1つ解放（[`BufferHandle`] のDrop時）
    pub(crate) fn release_consumer(&self, identity: BufferIdentity, handle: HandleId) {
        let mut state = self.state.lock();
        let outcome = lifecycle::release_consumer(
            &mut state.registry,
            &identity,
            handle,
            &*self.mapper,
            &*self.facility,
            &self.gateway,
        );

        #[cfg(feature = "verbose_logging")]
        log::trace!(target: "hdma", "release {:?} of {}: {:?}", handle, identity, outcome);

        if matches!(outcome, ReleaseOutcome::Dormant | ReleaseOutcome::Freed) {
            #[cfg(feature = "stats")]
            self.stats.record_release();
        }
    }

    pub(crate) fn query(&self, identity: &BufferIdentity, query: Query) -> HdmaResult<QueryValue> {
        let state = self.state.lock();
        let record = state
            .registry
            .find_by_identity(identity)
            .ok_or(HdmaError::NotFound)?;
        Ok(query.evaluate(record))
    }

    pub(crate) fn shared_list(&self) -> SharedListReport {
        SharedListReport::collect(&self.state.lock().registry)
    }
}

/// アナウンスの形式検査
fn validate(announcement: &Announcement, config: &HdmaConfig) -> HdmaResult<()> {
    if !announcement.identity.is_valid() {
        return Err(HdmaError::InvalidArgument("invalid buffer id"));
    }
    if announcement.private_data.len() > config.max_private_data {
        return Err(HdmaError::InvalidArgument("private data too large"));
    }
    if announcement.page_count == 0 {
        return Ok(());
    }
    if announcement.head_offset >= PAGE_SIZE {
        return Err(HdmaError::InvalidArgument("head offset beyond first page"));
    }
    if announcement.tail_length > PAGE_SIZE {
        return Err(HdmaError::InvalidArgument("tail length beyond last page"));
    }
    if announcement.remote_page_refs.len() < announcement.page_count {
        return Err(HdmaError::InvalidArgument("fewer page refs than page count"));
    }
    Ok(())
}

/// サービスドメイン側のDMA-BUFインポートサービス
pub struct HdmaService {
    shared: Arc<Shared>,
}

impl HdmaService {
    /// 外部プリミティブを指定してサービスを構築
    pub fn new(
        config: HdmaConfig,
        mapper: Arc<dyn RemotePageMapper>,
        transport: Arc<dyn ControlTransport>,
        facility: Arc<dyn ShareFacility>,
    ) -> Self {
        info!(
            target: "hdma",
            "service initialized (max {} buffers)",
            config.max_buffers
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServiceState {
                    registry: BufferRegistry::with_capacity(config.max_buffers),
                    connections: ConnectionRegistry::new(),
                }),
                mapper,
                facility,
                gateway: NotificationGateway::new(transport),
                config,
                #[cfg(feature = "stats")]
                stats: ServiceStats::new(),
            }),
        }
    }

    pub fn config(&self) -> &HdmaConfig {
        &self.shared.config
    }

    /// ゲストのエクスポート通知を登録
    pub fn announce(&self, announcement: Announcement) -> HdmaResult<()> {
        self.shared.announce(announcement)
    }

    /// バッファをインポートしてローカルハンドルを得る
    pub fn import(&self, identity: BufferIdentity, flags: ImportFlags) -> HdmaResult<BufferHandle> {
        import::import(&self.shared, identity, flags)
    }

    /// バッファを無効化
    pub fn revoke(&self, identity: &BufferIdentity) -> HdmaResult<Revocation> {
        self.shared.revoke(identity)
    }

    /// バッファの属性を問い合わせ
    pub fn query(&self, identity: &BufferIdentity, query: Query) -> HdmaResult<QueryValue> {
        self.shared.query(identity, query)
    }

    /// 共有中のバッファ一覧
    pub fn shared_list(&self) -> SharedListReport {
        self.shared.shared_list()
    }

    /// 登録中のバッファ数
    pub fn buffer_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// ゲスト接続を開く（ドメインにつき1つ）
    pub fn open_transport(&self, domain: DomainId) -> HdmaResult<TransportSession> {
        if domain == DomainId::SERVICE {
            return Err(HdmaError::InvalidArgument("service domain cannot connect as guest"));
        }
        self.shared.state.lock().connections.connect(domain)?;
        info!(target: "hdma", "{} connected", domain);
        Ok(TransportSession::new(self.shared.clone(), domain))
    }

    /// ローカルのインポート口を開く
    pub fn open_importer(&self) -> ImportSession {
        ImportSession::new(self.shared.clone())
    }

    /// 接続中のゲストドメイン
    pub fn connected_domains(&self) -> Vec<DomainId> {
        self.shared.state.lock().connections.domains()
    }

    /// サービス終了時の回収
    ///
    /// ハンドルのないレコードは即座に解放し、残りは無効化して
    /// 最後のハンドル解放時に解放させる。解放したレコード数を返す。
    pub fn teardown(&self) -> usize {
        let mapper = &*self.shared.mapper;
        let mut state = self.shared.state.lock();
        let freed = state.registry.retain(
            |record| {
                if record.handle_id().is_some() {
                    record.valid = false;
                    Visit::Keep
                } else {
                    Visit::Remove
                }
            },
            |mut record| lifecycle::unmap(&mut record, mapper),
        );
        info!(
            target: "hdma",
            "teardown: {} freed, {} still in use",
            freed,
            state.registry.len()
        );
        freed
    }

    /// 統計情報
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared
            .stats
            .snapshot(self.shared.gateway.failures())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::loopback::{CountingFacility, LoopbackMapper, RecordingTransport};
    use crate::buffer::BufferState;
    use crate::config::MAX_SIZE_PRIV_DATA;
    use crate::ipc::{AckStatus, ControlKind, GuestMessage};
    use crate::mm::RemotePageRef;
    use alloc::vec;

    struct Harness {
        service: HdmaService,
        mapper: Arc<LoopbackMapper>,
        transport: Arc<RecordingTransport>,
        facility: Arc<CountingFacility>,
    }

    fn harness() -> Harness {
        let mapper = Arc::new(LoopbackMapper::new());
        let transport = Arc::new(RecordingTransport::new());
        let facility = Arc::new(CountingFacility::new());
        let service = HdmaService::new(
            HdmaConfig::default(),
            mapper.clone(),
            transport.clone(),
            facility.clone(),
        );
        Harness {
            service,
            mapper,
            transport,
            facility,
        }
    }

    fn id(counter: u32) -> BufferIdentity {
        BufferIdentity::compose(DomainId::new(2), counter, [0xA, 0xB, 0xC])
    }

    fn announcement(identity: BufferIdentity, pages: usize) -> Announcement {
        Announcement {
            identity,
            remote_page_refs: (1..=pages as u64).map(RemotePageRef::new).collect(),
            page_count: pages,
            head_offset: 100,
            tail_length: 50,
            private_data: vec![1, 2, 3],
        }
    }

    fn state_of(h: &Harness, identity: &BufferIdentity) -> Option<BufferState> {
        h.service
            .shared
            .state
            .lock()
            .registry
            .find_by_identity(identity)
            .map(BufferRecord::state)
    }

    fn consumers_of(h: &Harness, identity: &BufferIdentity) -> usize {
        h.service
            .shared
            .state
            .lock()
            .registry
            .find_by_identity(identity)
            .map_or(0, BufferRecord::consumer_count)
    }

    #[test]
    fn test_announce_validation() {
        let h = harness();
        let mut bad = announcement(id(1), 2);
        bad.head_offset = PAGE_SIZE;
        assert!(matches!(h.service.announce(bad), Err(HdmaError::InvalidArgument(_))));

        let mut bad = announcement(id(1), 2);
        bad.tail_length = PAGE_SIZE + 1;
        assert!(h.service.announce(bad).is_err());

        let mut bad = announcement(id(1), 3);
        bad.remote_page_refs.truncate(2);
        assert!(h.service.announce(bad).is_err());

        let mut bad = announcement(id(1), 1);
        bad.private_data = vec![0; MAX_SIZE_PRIV_DATA + 1];
        assert!(h.service.announce(bad).is_err());

        assert_eq!(h.service.buffer_count(), 0);
    }

    #[test]
    fn test_duplicate_announce_is_rejected() {
        let h = harness();
        h.service.announce(announcement(id(1), 2)).unwrap();
        assert_eq!(
            h.service.announce(announcement(id(1), 4)),
            Err(HdmaError::AlreadyExists)
        );
        assert_eq!(
            h.service.query(&id(1), Query::Size),
            Ok(QueryValue::Size(2 * PAGE_SIZE))
        );
    }

    #[test]
    fn test_zero_page_export_resyncs_private_data() {
        let h = harness();
        h.service.announce(announcement(id(1), 2)).unwrap();

        let mut resync = announcement(id(1), 0);
        resync.remote_page_refs.clear();
        resync.private_data = vec![9, 9];
        h.service.announce(resync).unwrap();

        assert_eq!(
            h.service.query(&id(1), Query::PrivateInfo),
            Ok(QueryValue::Bytes(vec![9, 9]))
        );
        assert_eq!(h.service.buffer_count(), 1);

        let mut orphan = announcement(id(5), 0);
        orphan.remote_page_refs.clear();
        assert_eq!(h.service.announce(orphan), Err(HdmaError::NotFound));
    }

    #[test]
    fn test_handle_drop_releases_and_notifies() {
        let h = harness();
        h.service.announce(announcement(id(1), 3)).unwrap();

        let handle = h.service.import(id(1), ImportFlags::RW).unwrap();
        assert_eq!(handle.size(), 3 * PAGE_SIZE);
        assert_eq!(state_of(&h, &id(1)), Some(BufferState::Imported));

        let copy = handle.clone();
        drop(handle);
        assert_eq!(h.mapper.live_mappings(), 1);
        assert_eq!(h.transport.count(ControlKind::ReleaseNotify), 0);

        drop(copy);
        assert_eq!(h.mapper.live_mappings(), 0);
        assert_eq!(h.facility.live_objects(), 0);
        assert_eq!(h.transport.count(ControlKind::ReleaseNotify), 1);
        assert_eq!(state_of(&h, &id(1)), Some(BufferState::Announced));
    }

    #[test]
    fn test_reimport_after_release_notifies_again() {
        let h = harness();
        h.service.announce(announcement(id(1), 1)).unwrap();

        drop(h.service.import(id(1), ImportFlags::RW).unwrap());
        drop(h.service.import(id(1), ImportFlags::RW).unwrap());

        assert_eq!(h.transport.count(ControlKind::ImportNotify), 2);
        assert_eq!(h.transport.count(ControlKind::ReleaseNotify), 2);
        assert_eq!(h.mapper.map_calls(), 2);
    }

    #[test]
    fn test_map_dma_builds_sg_once() {
        let h = harness();
        h.service.announce(announcement(id(1), 3)).unwrap();
        let handle = h.service.import(id(1), ImportFlags::READ).unwrap();

        let lengths = handle
            .map_dma(|sgt| sgt.iter().map(|s| s.length).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(lengths, vec![PAGE_SIZE - 100, PAGE_SIZE, 50]);
        assert_eq!(handle.map_dma(|sgt| sgt.len()).unwrap(), 3);
    }

    #[test]
    fn test_map_dma_closure_may_use_handle() {
        let h = harness();
        h.service.announce(announcement(id(1), 3)).unwrap();
        let handle = h.service.import(id(1), ImportFlags::RW).unwrap();

        let (segments, size) = handle
            .map_dma(|sgt| (sgt.len(), handle.size()))
            .unwrap();
        assert_eq!((segments, size), (3, 3 * PAGE_SIZE));

        let inner = handle.map_dma(|_| handle.clone()).unwrap();
        assert_eq!(consumers_of(&h, &id(1)), 2);
        drop(inner);
        assert_eq!(consumers_of(&h, &id(1)), 1);
        assert_eq!(handle.sg_table().unwrap().len(), 3);
    }

    #[test]
    fn test_zombie_freed_on_last_release() {
        let h = harness();
        h.service.announce(announcement(id(1), 2)).unwrap();
        let handle = h.service.import(id(1), ImportFlags::RW).unwrap();

        assert_eq!(h.service.revoke(&id(1)), Ok(Revocation::Zombie));
        assert_eq!(state_of(&h, &id(1)), Some(BufferState::Zombie));
        assert!(matches!(
            h.service.import(id(1), ImportFlags::RW),
            Err(HdmaError::NotFound)
        ));

        drop(handle);
        assert_eq!(state_of(&h, &id(1)), None);
        assert_eq!(h.mapper.live_mappings(), 0);
    }

    #[test]
    fn test_revoke_after_release_frees_immediately() {
        let h = harness();
        h.service.announce(announcement(id(1), 2)).unwrap();
        drop(h.service.import(id(1), ImportFlags::RW).unwrap());

        assert_eq!(h.service.revoke(&id(1)), Ok(Revocation::Freed));
        assert_eq!(h.service.buffer_count(), 0);
        assert_eq!(h.service.revoke(&id(1)), Err(HdmaError::NotFound));
    }

    #[test]
    fn test_teardown_frees_idle_and_invalidates_busy() {
        let h = harness();
        h.service.announce(announcement(id(1), 1)).unwrap();
        h.service.announce(announcement(id(2), 2)).unwrap();
        h.service.announce(announcement(id(3), 3)).unwrap();
        let busy = h.service.import(id(3), ImportFlags::RW).unwrap();

        assert_eq!(h.service.teardown(), 2);
        assert_eq!(h.service.buffer_count(), 1);
        assert_eq!(state_of(&h, &id(3)), Some(BufferState::Zombie));

        drop(busy);
        assert_eq!(h.service.buffer_count(), 0);
        assert_eq!(h.mapper.live_mappings(), 0);
    }

    #[test]
    fn test_transport_session_lifecycle() {
        let h = harness();
        let session = h.service.open_transport(DomainId::new(2)).unwrap();
        assert_eq!(
            h.service.open_transport(DomainId::new(2)).unwrap_err(),
            HdmaError::AlreadyExists
        );
        assert_eq!(h.service.connected_domains(), vec![DomainId::new(2)]);

        let ack = session.handle(GuestMessage::NeedVmid);
        assert_eq!(ack.status, AckStatus::Processed);
        assert_eq!(ack.vmid, Some(DomainId::new(2)));

        assert!(session.handle(GuestMessage::Export(announcement(id(1), 2))).is_processed());
        assert!(!session.handle(GuestMessage::Export(announcement(id(1), 2))).is_processed());
        assert!(session.handle(GuestMessage::NotifyUnexport(id(1))).is_processed());
        assert!(!session.handle(GuestMessage::NotifyUnexport(id(1))).is_processed());

        drop(session);
        assert!(h.service.connected_domains().is_empty());
        assert!(h.service.open_transport(DomainId::new(2)).is_ok());
    }

    #[test]
    fn test_transport_session_rejects_foreign_ids() {
        let h = harness();
        let session = h.service.open_transport(DomainId::new(3)).unwrap();

        let ack = session.handle(GuestMessage::Export(announcement(id(1), 1)));
        assert_eq!(ack.status, AckStatus::Error);
        assert_eq!(h.service.buffer_count(), 0);

        let rejected = h
            .service
            .shared
            .state
            .lock()
            .connections
            .get(DomainId::new(3))
            .map(|c| c.messages_rejected);
        assert_eq!(rejected, Some(1));
    }

    #[test]
    fn test_service_domain_cannot_open_transport() {
        let h = harness();
        assert!(h.service.open_transport(DomainId::SERVICE).is_err());
    }

    #[test]
    fn test_import_session_shares_state() {
        let h = harness();
        let importer = h.service.open_importer();
        h.service.announce(announcement(id(1), 3)).unwrap();

        let handle = importer.import(id(1), ImportFlags::RW).unwrap();
        assert_eq!(importer.query(&id(1), Query::Imported), Ok(QueryValue::Flag(true)));
        assert_eq!(importer.shared_list().total_pages, 3);
        drop(handle);
        assert_eq!(importer.query(&id(1), Query::Imported), Ok(QueryValue::Flag(false)));
    }

    #[cfg(feature = "stats")]
    #[test]
    fn test_stats_counters() {
        let h = harness();
        h.service.announce(announcement(id(1), 1)).unwrap();
        h.transport.fail_with(Some(crate::ipc::TransportError::Nack));
        drop(h.service.import(id(1), ImportFlags::RW).unwrap());
        h.service.revoke(&id(1)).unwrap();

        let stats = h.service.stats();
        assert_eq!(stats.announcements, 1);
        assert_eq!(stats.imports, 1);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.revocations, 1);
        assert_eq!(stats.notify_failures, 2);
    }
}

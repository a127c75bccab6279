// ============================================================================
// tests/import_lifecycle.rs - インポート・解放の統合テスト
// ============================================================================

use hyperdmabuf::backend::{CountingFacility, LoopbackMapper, RecordingTransport};
use hyperdmabuf::{
    AckStatus, Announcement, BufferIdentity, ControlKind, DomainId, GuestMessage, HdmaConfig,
    HdmaError, HdmaService, ImportFlags, Query, QueryValue, RemotePageRef, Revocation, PAGE_SIZE,
};
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// テスト環境
// ============================================================================

struct Env {
    service: HdmaService,
    mapper: Arc<LoopbackMapper>,
    transport: Arc<RecordingTransport>,
    facility: Arc<CountingFacility>,
}

fn env() -> Env {
    env_with(HdmaConfig::default())
}

fn env_with(config: HdmaConfig) -> Env {
    let mapper = Arc::new(LoopbackMapper::new());
    let transport = Arc::new(RecordingTransport::new());
    let facility = Arc::new(CountingFacility::new());
    let service = HdmaService::new(config, mapper.clone(), transport.clone(), facility.clone());
    Env {
        service,
        mapper,
        transport,
        facility,
    }
}

const GUEST: DomainId = DomainId::new(2);

fn hid(counter: u32) -> BufferIdentity {
    BufferIdentity::compose(GUEST, counter, [0x1234, 0x5678, 0x9abc])
}

fn export(identity: BufferIdentity, pages: usize, head: usize, tail: usize) -> Announcement {
    Announcement {
        identity,
        remote_page_refs: (0..pages as u64).map(|i| RemotePageRef::new(0x100 + i)).collect(),
        page_count: pages,
        head_offset: head,
        tail_length: tail,
        private_data: Vec::new(),
    }
}

// ============================================================================
// シナリオ
// ============================================================================

#[test]
fn three_page_buffer_round_trip() {
    let env = env();
    let guest = env.service.open_transport(GUEST).unwrap();
    let ack = guest.handle(GuestMessage::Export(export(hid(7), 3, 100, 50)));
    assert_eq!(ack.status, AckStatus::Processed);

    let importer = env.service.open_importer();
    let handle = importer.import(hid(7), ImportFlags::RW).unwrap();
    assert_eq!(handle.size(), 3 * PAGE_SIZE);

    let layout = handle
        .map_dma(|sgt| {
            sgt.iter()
                .map(|seg| (seg.offset, seg.length))
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(layout, vec![(100, PAGE_SIZE - 100), (0, PAGE_SIZE), (0, 50)]);

    assert_eq!(
        env.transport.sent(),
        vec![(GUEST, ControlKind::ImportNotify, hid(7))]
    );

    drop(handle);
    assert_eq!(env.transport.count(ControlKind::ReleaseNotify), 1);
    assert_eq!(env.mapper.live_mappings(), 0);
    assert_eq!(env.facility.live_objects(), 0);

    let report = importer.shared_list().to_string();
    assert!(report.contains("#pg:3 | valid:1 | imped?:0"));
    assert!(report.ends_with("total num of pages: 3 (12288 Bytes)\n"));
}

#[test]
fn zombie_buffer_outlives_unexport() {
    let env = env();
    let guest = env.service.open_transport(GUEST).unwrap();
    guest.handle(GuestMessage::Export(export(hid(1), 2, 0, PAGE_SIZE)));

    let handle = env.service.import(hid(1), ImportFlags::RW).unwrap();
    let ack = guest.handle(GuestMessage::NotifyUnexport(hid(1)));
    assert_eq!(ack.status, AckStatus::Processed);

    assert_eq!(
        env.service.query(&hid(1), Query::Valid),
        Ok(QueryValue::Flag(false))
    );
    assert!(matches!(
        env.service.import(hid(1), ImportFlags::RW),
        Err(HdmaError::NotFound)
    ));

    // ゾンビでもDMAは引き続き可能
    assert_eq!(handle.map_dma(|sgt| sgt.len()).unwrap(), 2);

    drop(handle);
    assert_eq!(env.service.buffer_count(), 0);
    assert_eq!(env.mapper.live_mappings(), 0);
    assert_eq!(env.transport.count(ControlKind::ReleaseNotify), 1);
}

#[test]
fn failed_import_notification_does_not_block_import() {
    let env = env();
    env.service.announce(export(hid(3), 1, 0, 0)).unwrap();
    env.transport
        .fail_with(Some(hyperdmabuf::TransportError::Disconnected));

    let handle = env.service.import(hid(3), ImportFlags::READ).unwrap();
    assert_eq!(
        env.service.query(&hid(3), Query::Imported),
        Ok(QueryValue::Flag(false))
    );
    drop(handle);
    assert_eq!(env.mapper.live_mappings(), 0);
}

#[test]
fn notifications_can_be_disabled() {
    let env = env_with(HdmaConfig::default().with_notify_on_import(false));
    env.service.announce(export(hid(4), 1, 0, 0)).unwrap();

    drop(env.service.import(hid(4), ImportFlags::RW).unwrap());
    assert_eq!(env.transport.count(ControlKind::ImportNotify), 0);
    assert_eq!(env.transport.count(ControlKind::ReleaseNotify), 1);
}

#[test]
fn registry_capacity_is_enforced() {
    let env = env_with(HdmaConfig::default().with_max_buffers(2));
    env.service.announce(export(hid(1), 1, 0, 0)).unwrap();
    env.service.announce(export(hid(2), 1, 0, 0)).unwrap();
    assert_eq!(
        env.service.announce(export(hid(3), 1, 0, 0)),
        Err(HdmaError::RegistryFull)
    );

    assert_eq!(env.service.revoke(&hid(1)), Ok(Revocation::Freed));
    env.service.announce(export(hid(3), 1, 0, 0)).unwrap();
}

// ============================================================================
// 並行性
// ============================================================================

#[test]
fn racing_importers_share_one_handle() {
    const THREADS: usize = 8;
    let env = env();
    env.service.announce(export(hid(9), 4, 16, 32)).unwrap();
    let barrier = Barrier::new(THREADS);

    let handles: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    env.service.import(hid(9), ImportFlags::RW).unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let first = handles[0].id();
    assert!(handles.iter().all(|h| h.id() == first));
    assert_eq!(env.transport.count(ControlKind::ImportNotify), 1);
    assert_eq!(env.mapper.map_calls(), 1);
    assert_eq!(env.facility.created(), 1);
    assert_eq!(env.facility.attached(), THREADS);

    let barrier = Barrier::new(THREADS);
    thread::scope(|s| {
        for handle in handles {
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                drop(handle);
            });
        }
    });

    assert_eq!(env.transport.count(ControlKind::ReleaseNotify), 1);
    assert_eq!(env.mapper.live_mappings(), 0);
    assert_eq!(env.facility.live_objects(), 0);
    assert_eq!(env.service.buffer_count(), 1);
}

#[test]
fn revoke_racing_with_imports_never_leaks() {
    const IMPORTERS: usize = 4;
    let env = env();
    env.service.announce(export(hid(5), 2, 0, 0)).unwrap();
    let barrier = Barrier::new(IMPORTERS + 1);

    let handles: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = (0..IMPORTERS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    env.service.import(hid(5), ImportFlags::RW).ok()
                })
            })
            .collect();

        barrier.wait();
        env.service.revoke(&hid(5)).unwrap();

        workers
            .into_iter()
            .filter_map(|w| w.join().unwrap())
            .collect()
    });

    if handles.is_empty() {
        assert_eq!(env.service.buffer_count(), 0);
    } else {
        assert_eq!(
            env.service.query(&hid(5), Query::Valid),
            Ok(QueryValue::Flag(false))
        );
    }

    drop(handles);
    assert_eq!(env.service.buffer_count(), 0);
    assert_eq!(env.mapper.live_mappings(), 0);
    assert_eq!(env.facility.live_objects(), 0);
}

#[test]
fn teardown_with_outstanding_handle() {
    let env = env();
    let guest = env.service.open_transport(GUEST).unwrap();
    for counter in 0..4 {
        guest.handle(GuestMessage::Export(export(hid(counter), 1, 0, 0)));
    }
    let busy = env.service.import(hid(0), ImportFlags::RW).unwrap();

    assert_eq!(env.service.teardown(), 3);
    drop(guest);
    assert!(env.service.connected_domains().is_empty());

    drop(busy);
    assert_eq!(env.service.buffer_count(), 0);
    assert_eq!(env.mapper.live_mappings(), 0);
}

//! End-to-end behaviour of the transfer manager over a memory → disk → network chain.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assetlayer::cache::{CacheChain, CacheLayer, DiskCacheLayer, MemoryCacheLayer, NetworkCacheLayer};
use assetlayer::data::{DenseData, SparseData};
use assetlayer::fingerprint::{Fingerprint, RemoteFileId};
use assetlayer::range::Range;
use assetlayer::task::{EventManager, WorkQueue, WorkerPool};
use assetlayer::transfer::{TransferEvent, TransferManager, TransferStatus};
use common::{lookup_for, mem_handlers, transfer_services, MemStore, PAGE};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixture {
    manager: TransferManager,
    memory: Arc<MemoryCacheLayer>,
    disk: Arc<DiskCacheLayer>,
    network: Arc<NetworkCacheLayer>,
    store: Arc<MemStore>,
    _dir: TempDir,
}

fn fixture(store: Arc<MemStore>, memory_budget: u64) -> Fixture {
    let dir = TempDir::new().unwrap();
    let handlers = mem_handlers(&store);
    let lookup = lookup_for(&["mem://good/files/"]);
    let services = transfer_services(&handlers, lookup);

    let memory = Arc::new(MemoryCacheLayer::new(memory_budget, 1.0));
    let disk = Arc::new(DiskCacheLayer::open(dir.path(), 1 << 20, 1.0).unwrap());
    let network = Arc::new(NetworkCacheLayer::new(services.downloads.clone().unwrap()));
    let chain = CacheChain::new(vec![
        memory.clone() as Arc<dyn CacheLayer>,
        disk.clone(),
        network.clone(),
    ]);
    let manager = TransferManager::builder(chain)
        .services(services)
        .build()
        .unwrap();

    Fixture {
        manager,
        memory,
        disk,
        network,
        store,
        _dir: dir,
    }
}

fn publish_page(store: &MemStore) -> RemoteFileId {
    let fingerprint = Fingerprint::compute(PAGE);
    store.put(&format!("mem://good/files/{}", fingerprint.to_hex()), PAGE);
    RemoteFileId::local(fingerprint).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_walks_chain_and_populates_nearer_layers() {
    let f = fixture(MemStore::new(), 1 << 20);
    let id = publish_page(&f.store);
    let range = Range::with_length(2, 12, false);

    let data = f.manager.fetch(id.clone(), range).await.unwrap();
    assert_eq!(data.flatten().unwrap().as_ref(), b"TML>\r\n<HEAD>");
    assert_eq!(f.network.fetch_count(), 1);
    assert!(f.memory.holds(&id.fingerprint));
    assert!(f.disk.holds(&id.fingerprint));

    // Second request is answered by the memory layer.
    let again = f.manager.fetch(id.clone(), range).await.unwrap();
    assert_eq!(again.flatten().unwrap().as_ref(), b"TML>\r\n<HEAD>");
    assert_eq!(f.network.fetch_count(), 1);

    let snap = f.manager.metrics().snapshot();
    assert_eq!(snap.hits_at(2), 1);
    assert_eq!(snap.hits_at(0), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seeded_disk_answers_and_warms_memory() {
    let f = fixture(MemStore::new(), 1 << 20);
    let fp = Fingerprint::compute(PAGE);
    f.disk
        .store(&fp, &SparseData::from_dense(DenseData::whole_file(PAGE.to_vec())))
        .await;
    let range = Range::with_length(2, 12, false);

    let data = f
        .manager
        .fetch(RemoteFileId::local(fp).unwrap(), range)
        .await
        .unwrap();
    assert_eq!(data.flatten().unwrap().as_ref(), b"TML>\r\n<HEAD>");
    assert!(f.memory.contains(&fp, &range));
    assert_eq!(f.network.fetch_count(), 0);
    assert_eq!(f.store.download_count(), 0);
    assert_eq!(f.manager.metrics().snapshot().hits_at(1), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disk_answers_after_memory_purge() {
    let f = fixture(MemStore::new(), 1 << 20);
    let id = publish_page(&f.store);

    f.manager.fetch(id.clone(), Range::whole_file()).await.unwrap();
    f.memory.purge(&id.fingerprint).await;

    let data = f.manager.fetch(id.clone(), Range::whole_file()).await.unwrap();
    assert_eq!(data.flatten().unwrap().as_ref(), PAGE);
    assert_eq!(f.network.fetch_count(), 1);
    assert_eq!(f.manager.metrics().snapshot().hits_at(1), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn purge_removes_from_every_layer() {
    let f = fixture(MemStore::new(), 1 << 20);
    let id = publish_page(&f.store);

    f.manager.fetch(id.clone(), Range::whole_file()).await.unwrap();
    assert_eq!(f.manager.purge(&id.fingerprint).await, 2);
    assert!(!f.memory.holds(&id.fingerprint));
    assert!(!f.disk.holds(&id.fingerprint));

    f.manager.fetch(id, Range::whole_file()).await.unwrap();
    assert_eq!(f.network.fetch_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_walk() {
    let f = fixture(MemStore::with_delay(Duration::from_millis(100)), 1 << 20);
    let id = publish_page(&f.store);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..10u64 {
        let range = if i == 0 {
            Range::whole_file()
        } else {
            Range::with_length(i, 4, false)
        };
        let tx = tx.clone();
        f.manager.download(id.clone(), range, move |event: &TransferEvent| {
            let _ = tx.send((event.status(), event.data_for(&range)));
        });
    }
    drop(tx);

    let mut delivered = 0;
    while let Some((status, data)) = rx.recv().await {
        assert_eq!(status, TransferStatus::Success);
        assert!(data.is_some());
        delivered += 1;
    }
    assert_eq!(delivered, 10);
    assert_eq!(f.store.download_count(), 1);

    let snap = f.manager.metrics().snapshot();
    assert_eq!(snap.chain_walks, 1);
    assert_eq!(snap.downloads_joined, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_content_fails_every_waiter() {
    let f = fixture(MemStore::with_delay(Duration::from_millis(50)), 1 << 20);
    let id = RemoteFileId::local(Fingerprint::compute(b"never published")).unwrap();

    let first = f.manager.fetch(id.clone(), Range::whole_file());
    let second = f.manager.fetch(id, Range::with_length(0, 3, false));
    let (a, b) = tokio::join!(first, second);
    assert_eq!(a.unwrap_err(), TransferStatus::DownloadFailed);
    assert_eq!(b.unwrap_err(), TransferStatus::DownloadFailed);
    assert_eq!(f.manager.metrics().snapshot().chain_walks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_layer_respects_budget() {
    let f = fixture(MemStore::new(), 64);
    for n in 0..6u8 {
        let content = vec![n; 30];
        let fingerprint = Fingerprint::compute(&content);
        f.store
            .put(&format!("mem://good/files/{}", fingerprint.to_hex()), &content);
        let id = RemoteFileId::local(fingerprint).unwrap();
        f.manager.fetch(id, Range::whole_file()).await.unwrap();

        let stats = f.memory.stats();
        assert!(stats.bytes <= 64, "memory layer over budget: {stats}");
    }
    assert_eq!(f.memory.stats().entries, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cleanup_answers_waiters_before_returning() {
    let f = fixture(MemStore::with_delay(Duration::from_secs(30)), 1 << 20);
    let id = publish_page(&f.store);

    let calls = Arc::new(AtomicUsize::new(0));
    let statuses = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for range in [Range::whole_file(), Range::with_length(0, 4, false)] {
        let calls = Arc::clone(&calls);
        let statuses = Arc::clone(&statuses);
        f.manager.download(id.clone(), range, move |event| {
            calls.fetch_add(1, Ordering::SeqCst);
            statuses.lock().push(event.status());
        });
    }

    tokio::time::timeout(Duration::from_secs(5), f.manager.cleanup())
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(statuses
        .lock()
        .iter()
        .all(|s| *s == TransferStatus::ShutdownInProgress));
    assert_eq!(f.network.in_flight(), 0);

    // Later requests are refused immediately.
    let late = f.manager.fetch(id, Range::whole_file()).await;
    assert_eq!(late.unwrap_err(), TransferStatus::ShutdownInProgress);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_dispatch_drains_before_cleanup_returns() {
    let store = MemStore::with_delay(Duration::from_millis(20));
    let id = publish_page(&store);
    let handlers = mem_handlers(&store);
    let services = transfer_services(&handlers, lookup_for(&["mem://good/files/"]));
    let network = Arc::new(NetworkCacheLayer::new(services.downloads.clone().unwrap()));

    let queue = Arc::new(WorkQueue::new());
    let pool = WorkerPool::start(Arc::clone(&queue), 2, "test-events").unwrap();
    let manager = TransferManager::builder(CacheChain::new(vec![network as Arc<dyn CacheLayer>]))
        .events(EventManager::with_queue(queue))
        .services(services)
        .build()
        .unwrap();

    let data = manager.fetch(id.clone(), Range::whole_file()).await.unwrap();
    assert_eq!(data.flatten().unwrap().as_ref(), PAGE);

    let delivered = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let delivered = Arc::clone(&delivered);
        manager.download(id.clone(), Range::whole_file(), move |_event| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }

    manager.cleanup().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    tokio::task::spawn_blocking(move || pool.shutdown())
        .await
        .unwrap();
}

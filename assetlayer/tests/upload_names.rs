//! Publishing content and names, resolving names, and removal.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assetlayer::app::{AppConfig, AssetLayerApp};
use assetlayer::cache::{CacheChain, CacheLayer, MemoryCacheLayer, NetworkCacheLayer};
use assetlayer::fingerprint::Fingerprint;
use assetlayer::range::Range;
use assetlayer::transfer::{TransferManager, TransferStatus, UploadRequest};
use bytes::Bytes;
use common::{hash_context, lookup_for, mem_handlers, service_list, transfer_services, MemStore, PAGE};
use tempfile::TempDir;
use tokio::sync::mpsc;
use url::Url;

fn manager_for(store: &Arc<MemStore>, bases: &[&str]) -> (TransferManager, Arc<MemoryCacheLayer>) {
    let handlers = mem_handlers(store);
    let services = transfer_services(&handlers, lookup_for(bases));
    let memory = Arc::new(MemoryCacheLayer::new(1 << 20, 1.0));
    let network = Arc::new(NetworkCacheLayer::new(services.downloads.clone().unwrap()));
    let chain = CacheChain::new(vec![memory.clone() as Arc<dyn CacheLayer>, network]);
    let manager = TransferManager::builder(chain)
        .services(services)
        .build()
        .unwrap();
    (manager, memory)
}

fn name(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_stores_content_and_serves_it_locally() {
    let store = MemStore::new();
    let (manager, memory) = manager_for(&store, &["mem://good/files/"]);

    let request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();
    let target = request.target.clone();
    assert_eq!(manager.publish(request).await, TransferStatus::Success);

    let stored = store.get(&format!("mem://good/files/{}", target.fingerprint.to_hex()));
    assert_eq!(stored.as_deref(), Some(PAGE));
    assert!(memory.holds(&target.fingerprint));

    let data = manager.fetch(target, Range::whole_file()).await.unwrap();
    assert_eq!(data.flatten().unwrap().as_ref(), PAGE);
    assert_eq!(store.download_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_to_one_target_share_the_work() {
    let store = MemStore::with_delay(Duration::from_millis(50));
    let (manager, _) = manager_for(&store, &["mem://good/files/"]);
    let request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..2 {
        let tx = tx.clone();
        manager.upload(request.clone(), move |event| {
            let _ = tx.send(event.status());
        });
    }
    drop(tx);

    let mut statuses = Vec::new();
    while let Some(status) = rx.recv().await {
        statuses.push(status);
    }
    assert_eq!(statuses, vec![TransferStatus::Success; 2]);
    assert_eq!(store.upload_count(), 1);
    assert_eq!(manager.metrics().snapshot().uploads_joined, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn existing_content_is_not_uploaded_again() {
    let store = MemStore::new();
    let (manager, _) = manager_for(&store, &["mem://good/files/"]);
    let request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();
    store.put(
        &format!("mem://good/files/{}", request.target.fingerprint.to_hex()),
        PAGE,
    );

    assert_eq!(manager.publish(request.clone()).await, TransferStatus::Success);
    assert_eq!(store.upload_count(), 0);

    assert_eq!(manager.publish(request.force(true)).await, TransferStatus::Success);
    assert_eq!(store.upload_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatched_data_is_refused() {
    let store = MemStore::new();
    let (manager, _) = manager_for(&store, &["mem://good/files/"]);
    let mut request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();
    request.data = Bytes::from_static(b"something else");

    assert_eq!(manager.publish(request).await, TransferStatus::UploadFailed);
    assert_eq!(store.upload_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn named_upload_resolves_back_to_content() {
    let store = MemStore::new();
    let (manager, _) = manager_for(&store, &["mem://good/files/"]);
    let tree = name("mem://good/names/tree.mesh");

    let request = UploadRequest::for_content(&hash_context(), PAGE)
        .unwrap()
        .with_name(tree.clone());
    let target = request.target.clone();
    assert_eq!(manager.publish(request).await, TransferStatus::Success);
    assert_eq!(store.name_uploads.load(Ordering::SeqCst), 1);
    assert_eq!(store.resolved(tree.as_str()), Some(target.clone()));

    // Force the bytes to come from the service.
    manager.purge(&target.fingerprint).await;
    let (resolved, data) = manager
        .fetch_by_name(tree, Range::with_length(0, 6, false))
        .await
        .unwrap();
    assert_eq!(resolved, target);
    assert_eq!(data.flatten().unwrap().as_ref(), b"<HTML>");
    assert_eq!(store.download_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_name_fails_lookup() {
    let store = MemStore::new();
    let (manager, _) = manager_for(&store, &["mem://good/files/"]);

    let outcome = manager
        .fetch_by_name(name("mem://good/names/missing"), Range::whole_file())
        .await;
    assert_eq!(outcome.unwrap_err(), TransferStatus::NameLookupFailed);
    assert_eq!(store.download_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refusing_service_reports_auth_failure() {
    let store = MemStore::new();
    let (manager, _) = manager_for(&store, &["mem://denied/files/"]);

    let request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();
    assert_eq!(manager.publish(request).await, TransferStatus::AuthFailed);

    let outcome = manager
        .fetch_by_name(name("mem://denied/names/tree.mesh"), Range::whole_file())
        .await;
    assert_eq!(outcome.unwrap_err(), TransferStatus::AuthFailed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_candidate_falls_through_to_the_next() {
    let store = MemStore::new();
    let (manager, _) = manager_for(&store, &["mem://denied/files/", "mem://good/files/"]);

    let request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();
    let target = request.target.clone();
    assert_eq!(manager.publish(request).await, TransferStatus::Success);
    assert!(store
        .get(&format!("mem://good/files/{}", target.fingerprint.to_hex()))
        .is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remove_deletes_remote_and_local_copies() {
    let store = MemStore::new();
    let (manager, memory) = manager_for(&store, &["mem://good/files/"]);
    let request = UploadRequest::for_content(&hash_context(), PAGE).unwrap();
    let target = request.target.clone();
    let uri = format!("mem://good/files/{}", target.fingerprint.to_hex());
    assert_eq!(manager.publish(request).await, TransferStatus::Success);

    assert_eq!(manager.remove(&target).await, TransferStatus::Success);
    assert!(store.get(&uri).is_none());
    assert!(!memory.holds(&target.fingerprint));

    assert_eq!(manager.remove(&target).await, TransferStatus::UploadFailed);
    let gone = manager.fetch(target, Range::whole_file()).await;
    assert_eq!(gone.unwrap_err(), TransferStatus::DownloadFailed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cleanup_waits_for_remove_in_progress() {
    let store = MemStore::with_delay(Duration::from_millis(200));
    let (manager, _) = manager_for(&store, &["mem://good/files/"]);
    let target = UploadRequest::for_content(&hash_context(), PAGE)
        .unwrap()
        .target;
    let uri = format!("mem://good/files/{}", target.fingerprint.to_hex());
    store.put(&uri, PAGE);

    let removing = {
        let manager = manager.clone();
        let target = target.clone();
        tokio::spawn(async move { manager.remove(&target).await })
    };
    tokio::time::timeout(Duration::from_secs(2), async {
        while manager.pending_operations() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    manager.cleanup().await;
    assert!(store.get(&uri).is_none());
    assert_eq!(manager.pending_operations(), 0);
    assert_eq!(removing.await.unwrap(), TransferStatus::Success);

    assert_eq!(manager.remove(&target).await, TransferStatus::ShutdownInProgress);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn app_publishes_and_fetches_through_configured_services() {
    let dir = TempDir::new().unwrap();
    let store = MemStore::new();
    let config = AppConfig::new(dir.path().join("cache"))
        .with_memory_cache_size(1 << 20)
        .with_services(hash_context(), service_list(&["mem://good/files/"]));
    let app = AssetLayerApp::start_with_handlers(config, mem_handlers(&store))
        .await
        .unwrap();

    let content = b"mesh data published through the app".to_vec();
    let request = UploadRequest::for_content(&hash_context(), content.clone())
        .unwrap()
        .with_name(name("mem://good/names/rock.mesh"));
    let fingerprint: Fingerprint = request.target.fingerprint;
    assert_eq!(app.transfer().publish(request).await, TransferStatus::Success);

    assert_eq!(app.purge(&fingerprint).await, 2);
    let (_, data) = app
        .transfer()
        .fetch_by_name(name("mem://good/names/rock.mesh"), Range::whole_file())
        .await
        .unwrap();
    assert_eq!(data.flatten().unwrap().as_ref(), content.as_slice());

    let disk = app.disk_cache().unwrap();
    assert!(disk.holds(&fingerprint));
    app.shutdown().await;
}

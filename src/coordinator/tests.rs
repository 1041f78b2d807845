use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::bus::LocalBus;
use crate::database::{MemoryPasteRepository, PastePatch};
use crate::error::{StoreError, StoreResult};
use crate::kv::{KvEntry, KvValue, MemoryKv};
use crate::paste::{content_hash, now_ms, Paste, PasteDraft, PasteMeta, Requester};
use crate::retry::{RetryPolicy, RollbackPolicy};

const OWNER: &str = "owner@example.com";

/// Memory store with switchable faults and a read counter.
#[derive(Default)]
struct TestRepository {
    inner: MemoryPasteRepository,
    refuse_writes: AtomicBool,
    refuse_reads: AtomicBool,
    transient_writes: AtomicU32,
    gets: AtomicUsize,
}

impl TestRepository {
    fn write_fault(&self) -> Option<StoreError> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Some(StoreError::Internal("write refused".into()));
        }
        let remaining = self.transient_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_writes.store(remaining - 1, Ordering::SeqCst);
            return Some(StoreError::Connection("reset by peer".into()));
        }
        None
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PasteRepository for TestRepository {
    async fn create(&self, paste: &Paste) -> StoreResult<bool> {
        match self.write_fault() {
            Some(err) => Err(err),
            None => self.inner.create(paste).await,
        }
    }

    async fn get_by_key(&self, key: &str) -> StoreResult<Option<Paste>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.refuse_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Internal("read refused".into()));
        }
        self.inner.get_by_key(key).await
    }

    async fn update(&self, key: &str, patch: &PastePatch) -> StoreResult<bool> {
        match self.write_fault() {
            Some(err) => Err(err),
            None => self.inner.update(key, patch).await,
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn list_alive(&self, limit: u64, offset: u64) -> StoreResult<Page<PasteSummary>> {
        self.inner.list_alive(limit, offset).await
    }

    async fn paginate_by_owner(
        &self,
        email: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Page<PasteSummary>> {
        self.inner.paginate_by_owner(email, limit, offset).await
    }

    async fn count(&self) -> StoreResult<u64> {
        self.inner.count().await
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.inner.all_keys().await
    }

    fn backend_name(&self) -> &'static str {
        "test"
    }
}

/// Memory KV whose removals can be refused.
#[derive(Default)]
struct TestKv {
    inner: MemoryKv,
    refuse_deletes: AtomicBool,
    deletes: AtomicUsize,
}

#[async_trait]
impl KvStore for TestKv {
    async fn get(&self, key: &str) -> StoreResult<Option<KvEntry>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &KvValue) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.refuse_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("kv unreachable".into()));
        }
        self.inner.delete(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        value: &KvValue,
    ) -> StoreResult<bool> {
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, KvEntry)>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "test"
    }
}

/// Shared tiers; every `node()` is a separate coordinator with its own L1.
struct Cluster {
    repo: Arc<TestRepository>,
    kv: Arc<TestKv>,
    bus: Arc<LocalBus>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            repo: Arc::new(TestRepository::default()),
            kv: Arc::new(TestKv::default()),
            bus: Arc::new(LocalBus::new()),
        }
    }

    fn node(&self) -> Coordinator {
        self.node_with(test_config())
    }

    fn node_with(&self, config: Config) -> Coordinator {
        let tiers = Tiers {
            repo: self.repo.clone(),
            kv: self.kv.clone(),
            bus: self.bus.clone(),
        };
        Coordinator::new(tiers, &config)
    }

    async fn kv_meta(&self, key: &str) -> Option<PasteMeta> {
        match self.kv.get(key).await.unwrap().map(|e| e.value) {
            Some(KvValue::Meta(meta)) => Some(meta),
            _ => None,
        }
    }
}

fn test_config() -> Config {
    Config {
        retry: RetryPolicy::new(3, Duration::from_millis(1)).jitter(Duration::ZERO),
        rollback: RollbackPolicy::new(3, Duration::from_millis(1)),
        ..Config::default()
    }
}

fn draft(content: &str) -> PasteDraft {
    PasteDraft {
        content: content.as_bytes().to_vec(),
        mime: "text/plain".to_string(),
        password: None,
        expire: now_ms() + 60_000,
        ip: "127.0.0.1".to_string(),
        email: OWNER.to_string(),
        name: "Owner".to_string(),
    }
}

fn protected(content: &str, password: &str) -> PasteDraft {
    PasteDraft {
        password: Some(password.to_string()),
        ..draft(content)
    }
}

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_create_then_read_without_store() {
    let cluster = Cluster::new();
    let node = cluster.node();

    let created = node.create("abcd", draft("hello")).await.unwrap();
    assert_eq!(created.key, "abcd");
    assert_eq!(created.url, "http://localhost:8000/abcd");

    let gets = cluster.repo.gets();
    let paste = node.resolve("abcd", None).await.unwrap();
    assert_eq!(paste.content, b"hello");
    assert_eq!(cluster.repo.gets(), gets);

    node.drain().await;
    let stored = cluster.repo.inner.get_by_key("abcd").await.unwrap().unwrap();
    assert_eq!(stored.content, b"hello");
    assert_eq!(cluster.kv_meta("abcd").await, Some(stored.meta()));
}

#[tokio::test]
async fn test_second_create_conflicts() {
    let cluster = Cluster::new();
    let node = cluster.node();

    node.create("abcd", draft("first")).await.unwrap();
    let err = node.create("abcd", draft("second")).await.unwrap_err();
    assert_eq!(err, PasteError::Conflict("abcd".into()));
    assert_eq!(err.status_code(), 409);

    node.drain().await;
    let stored = cluster.repo.inner.get_by_key("abcd").await.unwrap().unwrap();
    assert_eq!(stored.content, b"first");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_have_one_winner() {
    let cluster = Cluster::new();
    let nodes: Vec<_> = (0..4).map(|_| cluster.node()).collect();

    let mut handles = Vec::new();
    for i in 0..16 {
        let node = nodes[i % nodes.len()].clone();
        handles.push(tokio::spawn(async move {
            node.create("race", draft(&format!("writer {i}"))).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(matches!(err, PasteError::Conflict(_))),
        }
    }
    assert_eq!(winners, 1);

    for node in &nodes {
        node.drain().await;
    }
    assert_eq!(cluster.repo.inner.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_persist_rolls_back_everywhere() {
    let cluster = Cluster::new();
    let writer = cluster.node();
    let reader = cluster.node();
    cluster.repo.refuse_writes.store(true, Ordering::SeqCst);

    writer.create("gone", draft("never stored")).await.unwrap();
    writer.drain().await;

    assert!(cluster.kv.get("gone").await.unwrap().is_none());
    assert_eq!(writer.local_cache().get("gone"), None);
    assert_eq!(writer.resolve("gone", None).await.unwrap_err(), PasteError::NotFound);
    assert_eq!(reader.resolve("gone", None).await.unwrap_err(), PasteError::NotFound);

    // The key is free again, for anyone.
    cluster.repo.refuse_writes.store(false, Ordering::SeqCst);
    reader.create("gone", draft("second try")).await.unwrap();
    reader.drain().await;
    assert!(cluster.repo.inner.get_by_key("gone").await.unwrap().is_some());
}

#[tokio::test]
async fn test_transient_store_errors_are_retried() {
    let cluster = Cluster::new();
    let node = cluster.node();
    cluster.repo.transient_writes.store(2, Ordering::SeqCst);

    node.create("flaky", draft("eventually")).await.unwrap();
    node.drain().await;

    assert!(cluster.repo.inner.get_by_key("flaky").await.unwrap().is_some());
    assert!(cluster.kv_meta("flaky").await.is_some());
}

#[tokio::test]
async fn test_retries_exhausted_rolls_back() {
    let cluster = Cluster::new();
    let node = cluster.node();
    cluster.repo.transient_writes.store(5, Ordering::SeqCst);

    node.create("flaky", draft("lost")).await.unwrap();
    node.drain().await;

    assert!(cluster.repo.inner.get_by_key("flaky").await.unwrap().is_none());
    assert!(cluster.kv.get("flaky").await.unwrap().is_none());
}

#[tokio::test]
async fn test_password_gate_on_every_tier() {
    let cluster = Cluster::new();
    let writer = cluster.node();

    writer.create("lock", protected("secret", "pw")).await.unwrap();
    writer.drain().await;

    // L1 full record.
    assert_eq!(writer.resolve("lock", None).await.unwrap_err(), PasteError::Forbidden);
    assert_eq!(
        writer.resolve("lock", Some("nope")).await.unwrap_err(),
        PasteError::Forbidden
    );
    assert_eq!(writer.resolve("lock", Some("pw")).await.unwrap().content, b"secret");

    // Fresh node: rejected from the L2 projection without touching the store.
    let reader = cluster.node();
    let gets = cluster.repo.gets();
    assert_eq!(reader.resolve("lock", None).await.unwrap_err(), PasteError::Forbidden);
    assert_eq!(cluster.repo.gets(), gets);
    assert_eq!(reader.resolve("lock", Some("pw")).await.unwrap().content, b"secret");
}

#[tokio::test]
async fn test_empty_password_is_open() {
    let cluster = Cluster::new();
    let node = cluster.node();

    node.create("open", protected("public", "")).await.unwrap();
    assert!(node.resolve("open", None).await.is_ok());
    assert!(node.resolve("open", Some("anything")).await.is_ok());
}

#[tokio::test]
async fn test_expired_paste_is_not_found() {
    let cluster = Cluster::new();
    let node = cluster.node();

    let short = PasteDraft {
        expire: now_ms() + 150,
        ..draft("brief")
    };
    node.create("brief", short).await.unwrap();
    node.drain().await;
    assert!(node.resolve("brief", None).await.is_ok());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(node.resolve("brief", None).await.unwrap_err(), PasteError::NotFound);
    let fresh = cluster.node();
    assert_eq!(fresh.resolve("brief", None).await.unwrap_err(), PasteError::NotFound);
}

#[tokio::test]
async fn test_missing_key_leaves_negative_marker() {
    let cluster = Cluster::new();
    let node = cluster.node();

    assert_eq!(node.resolve("nope", None).await.unwrap_err(), PasteError::NotFound);
    assert_eq!(node.local_cache().get("nope"), Some(L1Entry::Missing));
    assert_eq!(node.resolve("nope", None).await.unwrap_err(), PasteError::NotFound);
    assert_eq!(cluster.repo.gets(), 0);
}

#[tokio::test]
async fn test_reserved_but_unpersisted_is_not_found_elsewhere() {
    let cluster = Cluster::new();
    let reader = cluster.node();

    // Reservation visible in L2, store row not there yet.
    let paste = Paste::from_draft("soon", draft("pending"), now_ms());
    cluster.kv.set("soon", &KvValue::Meta(paste.meta())).await.unwrap();

    assert_eq!(reader.resolve("soon", None).await.unwrap_err(), PasteError::NotFound);
    // No negative marker: the row may still land.
    assert_eq!(reader.local_cache().get("soon"), None);

    cluster.repo.inner.create(&paste).await.unwrap();
    assert_eq!(reader.resolve("soon", None).await.unwrap().content, b"pending");
}

#[tokio::test]
async fn test_placeholder_is_replaced_from_store() {
    let cluster = Cluster::new();
    let node = cluster.node();

    let paste = Paste::from_draft("old", draft("legacy"), now_ms());
    cluster.repo.inner.create(&paste).await.unwrap();
    cluster.kv.set("old", &KvValue::Placeholder).await.unwrap();

    let resolved = node.resolve("old", None).await.unwrap();
    assert_eq!(resolved.content, b"legacy");
    assert_eq!(cluster.kv_meta("old").await, Some(paste.meta()));
}

#[tokio::test]
async fn test_store_outage_on_read_is_unavailable() {
    let cluster = Cluster::new();
    let writer = cluster.node();
    writer.create("down", draft("content")).await.unwrap();
    writer.drain().await;

    cluster.repo.refuse_reads.store(true, Ordering::SeqCst);
    let reader = cluster.node();
    assert_eq!(reader.resolve("down", None).await.unwrap_err(), PasteError::Unavailable);
    assert_eq!(PasteError::Unavailable.status_code(), 503);
}

#[tokio::test]
async fn test_lookup_meta_skips_content() {
    let cluster = Cluster::new();
    let writer = cluster.node();
    writer.create("meta", draft("body")).await.unwrap();
    writer.drain().await;

    let reader = cluster.node();
    let gets = cluster.repo.gets();
    let meta = reader.lookup_meta("meta").await.unwrap().unwrap();
    assert_eq!(meta.hash, content_hash(b"body"));
    assert_eq!(cluster.repo.gets(), gets);
    assert!(matches!(reader.local_cache().get("meta"), Some(L1Entry::Meta(_))));

    assert_eq!(reader.lookup_meta("other").await.unwrap(), None);
}

#[tokio::test]
async fn test_authorize() {
    let cluster = Cluster::new();
    let node = cluster.node();
    node.create("mine", protected("body", "pw")).await.unwrap();

    let owner = Requester::new(OWNER).with_password("pw");
    assert!(node.authorize("mine", &owner).await.is_ok());
    assert_eq!(
        node.authorize("mine", &Requester::new(OWNER)).await.unwrap_err(),
        PasteError::Forbidden
    );
    assert_eq!(
        node.authorize("mine", &Requester::new("other@example.com").with_password("pw"))
            .await
            .unwrap_err(),
        PasteError::Forbidden
    );
    assert_eq!(
        node.authorize("absent", &owner).await.unwrap_err(),
        PasteError::NotFound
    );
}

#[tokio::test]
async fn test_update_is_visible_at_once_and_persisted() {
    let cluster = Cluster::new();
    let node = cluster.node();
    let owner = Requester::new(OWNER);

    node.create("doc", draft("v1")).await.unwrap();
    node.drain().await;

    let updated = node.update("doc", draft("v2"), &owner).await.unwrap();
    assert_eq!(updated.url, "http://localhost:8000/doc");
    assert_eq!(node.resolve("doc", None).await.unwrap().content, b"v2");

    node.drain().await;
    let stored = cluster.repo.inner.get_by_key("doc").await.unwrap().unwrap();
    assert_eq!(stored.content, b"v2");
    assert_eq!(cluster.kv_meta("doc").await.unwrap().hash, content_hash(b"v2"));
}

#[tokio::test]
async fn test_update_keeps_owner() {
    let cluster = Cluster::new();
    let node = cluster.node();
    node.create("doc", draft("v1")).await.unwrap();
    node.drain().await;

    let hijack = PasteDraft {
        email: "thief@example.com".into(),
        ..draft("v2")
    };
    node.update("doc", hijack, &Requester::new(OWNER)).await.unwrap();
    node.drain().await;

    let stored = cluster.repo.inner.get_by_key("doc").await.unwrap().unwrap();
    assert_eq!(stored.email, OWNER);
}

#[tokio::test]
async fn test_update_by_stranger_is_forbidden() {
    let cluster = Cluster::new();
    let node = cluster.node();
    node.create("doc", draft("v1")).await.unwrap();
    node.drain().await;
    let projected = cluster.kv_meta("doc").await;
    let stored = cluster.repo.inner.get_by_key("doc").await.unwrap();

    let err = node
        .update("doc", draft("v2"), &Requester::new("stranger@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err, PasteError::Forbidden);
    assert_eq!(node.pending_jobs(), 0);
    node.drain().await;

    assert_eq!(node.resolve("doc", None).await.unwrap().content, b"v1");
    assert_eq!(cluster.kv_meta("doc").await, projected);
    assert_eq!(cluster.repo.inner.get_by_key("doc").await.unwrap(), stored);
}

#[tokio::test]
async fn test_failed_update_restores_previous() {
    let cluster = Cluster::new();
    let node = cluster.node();
    let owner = Requester::new(OWNER);

    node.create("doc", draft("v1")).await.unwrap();
    node.drain().await;
    // Fill L1 with the full record.
    node.resolve("doc", None).await.unwrap();

    cluster.repo.refuse_writes.store(true, Ordering::SeqCst);
    node.update("doc", draft("v2"), &owner).await.unwrap();
    node.drain().await;

    assert_eq!(node.resolve("doc", None).await.unwrap().content, b"v1");
    assert_eq!(cluster.kv_meta("doc").await.unwrap().hash, content_hash(b"v1"));
    let fresh = cluster.node();
    assert_eq!(fresh.resolve("doc", None).await.unwrap().content, b"v1");
}

#[tokio::test]
async fn test_update_reaches_other_nodes() {
    let cluster = Cluster::new();
    let writer = cluster.node();
    let reader = cluster.node();

    writer.create("shared", draft("v1")).await.unwrap();
    writer.drain().await;
    assert_eq!(reader.resolve("shared", None).await.unwrap().content, b"v1");

    writer
        .update("shared", draft("v2"), &Requester::new(OWNER))
        .await
        .unwrap();
    writer.drain().await;

    let v2 = content_hash(b"v2");
    eventually(|| {
        matches!(reader.local_cache().get("shared"), Some(L1Entry::Meta(ref m)) if m.hash == v2)
    })
    .await;
    assert_eq!(reader.resolve("shared", None).await.unwrap().content, b"v2");
}

#[tokio::test]
async fn test_soft_delete() {
    let cluster = Cluster::new();
    let writer = cluster.node();
    let reader = cluster.node();
    let owner = Requester::new(OWNER);

    writer.create("bye", draft("content")).await.unwrap();
    writer.drain().await;
    reader.resolve("bye", None).await.unwrap();

    writer.soft_delete("bye", &owner).await.unwrap();
    assert_eq!(writer.resolve("bye", None).await.unwrap_err(), PasteError::NotFound);

    writer.drain().await;
    let stored = cluster.repo.inner.get_by_key("bye").await.unwrap().unwrap();
    assert!(stored.content.is_empty());
    assert!(stored.expire < 0);

    eventually(|| matches!(reader.local_cache().get("bye"), Some(L1Entry::Meta(ref m)) if m.expire < 0))
        .await;
    assert_eq!(reader.resolve("bye", None).await.unwrap_err(), PasteError::NotFound);

    // Tombstones keep the key reserved.
    assert!(matches!(
        writer.create("bye", draft("again")).await,
        Err(PasteError::Conflict(_))
    ));
}

/// Tombstone on every tier, and no way back to a live record.
async fn assert_deleted_everywhere(cluster: &Cluster, key: &str) {
    let owner = Requester::new(OWNER);

    let stored = cluster.repo.inner.get_by_key(key).await.unwrap().unwrap();
    assert!(stored.content.is_empty());
    assert!(stored.expire < 0);
    assert!(cluster.kv_meta(key).await.unwrap().expire < 0);

    let fresh = cluster.node();
    assert!(fresh.lookup_meta(key).await.unwrap().unwrap().expire < 0);
    assert_eq!(fresh.resolve(key, None).await.unwrap_err(), PasteError::NotFound);
    assert_eq!(
        fresh.update(key, draft("revived"), &owner).await.unwrap_err(),
        PasteError::NotFound
    );
}

#[tokio::test]
async fn test_delete_behind_pending_create() {
    let cluster = Cluster::new();
    let node = cluster.node();
    let owner = Requester::new(OWNER);

    node.create("brief", draft("content")).await.unwrap();
    node.soft_delete("brief", &owner).await.unwrap();
    assert_eq!(node.pending_jobs(), 2);
    node.drain().await;

    assert!(matches!(node.local_cache().get("brief"), Some(L1Entry::Meta(ref m)) if m.expire < 0));
    assert_eq!(
        node.update("brief", draft("revived"), &owner).await.unwrap_err(),
        PasteError::NotFound
    );
    assert_deleted_everywhere(&cluster, "brief").await;
}

#[tokio::test]
async fn test_delete_behind_pending_update() {
    let cluster = Cluster::new();
    let writer = cluster.node();
    let reader = cluster.node();
    let owner = Requester::new(OWNER);

    writer.create("doc", draft("v1")).await.unwrap();
    writer.drain().await;
    reader.resolve("doc", None).await.unwrap();

    writer.update("doc", draft("v2"), &owner).await.unwrap();
    writer.soft_delete("doc", &owner).await.unwrap();
    writer.drain().await;

    assert_eq!(writer.resolve("doc", None).await.unwrap_err(), PasteError::NotFound);
    eventually(|| matches!(reader.local_cache().get("doc"), Some(L1Entry::Meta(ref m)) if m.expire < 0))
        .await;
    assert_eq!(
        reader.update("doc", draft("v3"), &owner).await.unwrap_err(),
        PasteError::NotFound
    );
    assert_deleted_everywhere(&cluster, "doc").await;
}

#[tokio::test]
async fn test_unreleased_reservation_is_left_in_place() {
    let cluster = Cluster::new();
    let node = cluster.node();
    cluster.repo.refuse_writes.store(true, Ordering::SeqCst);
    cluster.kv.refuse_deletes.store(true, Ordering::SeqCst);

    node.create("stuck", draft("never stored")).await.unwrap();
    node.drain().await;

    // Every rollback attempt was spent on the release.
    assert_eq!(cluster.kv.deletes.load(Ordering::SeqCst), 3);
    assert!(cluster.kv_meta("stuck").await.is_some());
    assert_eq!(node.pending_jobs(), 0);

    // The orphan holds the key but serves nothing.
    assert_eq!(node.local_cache().get("stuck"), None);
    assert_eq!(node.resolve("stuck", None).await.unwrap_err(), PasteError::NotFound);
    assert!(matches!(
        node.create("stuck", draft("again")).await,
        Err(PasteError::Conflict(_))
    ));

    // Other keys are unaffected.
    cluster.repo.refuse_writes.store(false, Ordering::SeqCst);
    node.create("other", draft("fine")).await.unwrap();
    node.drain().await;
    assert!(cluster.repo.inner.get_by_key("other").await.unwrap().is_some());
}

#[tokio::test]
async fn test_soft_delete_twice_changes_nothing() {
    let cluster = Cluster::new();
    let node = cluster.node();
    let owner = Requester::new(OWNER);

    node.create("once", draft("content")).await.unwrap();
    node.drain().await;
    node.soft_delete("once", &owner).await.unwrap();
    node.drain().await;
    let first = cluster.repo.inner.get_by_key("once").await.unwrap().unwrap();

    assert_eq!(
        node.soft_delete("once", &owner).await.unwrap_err(),
        PasteError::NotFound
    );
    node.drain().await;
    let second = cluster.repo.inner.get_by_key("once").await.unwrap().unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_rejects_bad_input() {
    let cluster = Cluster::new();
    let config = Config {
        max_content_bytes: 4,
        ..test_config()
    };
    let node = cluster.node_with(config);

    assert_eq!(
        node.create("a", draft("x")).await.unwrap_err(),
        PasteError::InvalidKey("a".into())
    );
    assert_eq!(
        node.create("bad key", draft("x")).await.unwrap_err().status_code(),
        400
    );
    assert_eq!(
        node.create("abcd", draft("too long")).await.unwrap_err(),
        PasteError::TooLarge { size: 8, limit: 4 }
    );
    assert!(cluster.kv.inner.is_empty());
}

#[tokio::test]
async fn test_create_generated() {
    let cluster = Cluster::new();
    let node = cluster.node();

    let created = node.create_generated(draft("anon")).await.unwrap();
    assert_eq!(created.key.len(), 6);
    assert!(crate::paste::is_valid_key(&created.key));
    assert_eq!(node.resolve(&created.key, None).await.unwrap().content, b"anon");
}

#[tokio::test]
async fn test_listing_and_count() {
    let cluster = Cluster::new();
    let node = cluster.node();

    node.create("one", draft("1")).await.unwrap();
    node.create("two", draft("2")).await.unwrap();
    node.create(
        "theirs",
        PasteDraft {
            email: "other@example.com".into(),
            ..draft("3")
        },
    )
    .await
    .unwrap();
    node.drain().await;

    let page = node.list_owned(OWNER, 10, 0).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 2);
    assert_eq!(node.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_drain_waits_for_queue() {
    let cluster = Cluster::new();
    let node = cluster.node();

    for i in 0..10 {
        node.create(&format!("key{i}"), draft("x")).await.unwrap();
    }
    node.drain().await;
    assert_eq!(node.pending_jobs(), 0);
    assert_eq!(cluster.repo.inner.count().await.unwrap(), 10);
}

#[tokio::test]
async fn test_mirror_store_keys_seeds_placeholders() {
    let cluster = Cluster::new();
    let node = cluster.node();

    node.create("known", draft("in both")).await.unwrap();
    node.drain().await;
    let legacy = Paste::from_draft("legacy", draft("store only"), now_ms());
    cluster.repo.inner.create(&legacy).await.unwrap();

    assert_eq!(node.mirror_store_keys().await.unwrap(), 1);
    assert_eq!(
        cluster.kv.get("legacy").await.unwrap().map(|e| e.value),
        Some(KvValue::Placeholder)
    );
    assert!(matches!(
        node.create("legacy", draft("taken")).await,
        Err(PasteError::Conflict(_))
    ));

    assert_eq!(node.resolve("legacy", None).await.unwrap().content, b"store only");
    assert_eq!(cluster.kv_meta("legacy").await, Some(legacy.meta()));
    assert_eq!(node.mirror_store_keys().await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_alive_skips_tombstones() {
    let cluster = Cluster::new();
    let node = cluster.node();

    node.create("keep", draft("1")).await.unwrap();
    node.create("drop", draft("2")).await.unwrap();
    node.drain().await;
    node.soft_delete("drop", &Requester::new(OWNER)).await.unwrap();
    node.drain().await;

    let page = node.list_alive(10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].key, "keep");
}

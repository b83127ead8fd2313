//! Integration tests for flurry

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use flurry::config::{LoaderConfig, ShardKey};
use flurry::error::StoreError;
use flurry::pipeline::{FileStatus, run_pipeline};
use flurry::record::codec::decode_value;
use flurry::source::list_sources;
use flurry::store::{KeyValueStore, StoreFactory};

// ============================================================================
// Helpers
// ============================================================================

type Writes = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// In-memory store shared by all shards; fails writes for listed keys.
#[derive(Default, Clone)]
struct RecordingStores {
    writes: Writes,
    failing_keys: Arc<HashSet<String>>,
}

impl RecordingStores {
    fn failing(keys: &[&str]) -> Self {
        Self {
            failing_keys: Arc::new(keys.iter().map(|k| k.to_string()).collect()),
            ..Default::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

struct RecordingStore {
    address: String,
    stores: RecordingStores,
}

#[async_trait]
impl KeyValueStore for RecordingStore {
    async fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        if self.stores.failing_keys.contains(key) {
            return Err(StoreError::Rejected {
                address: self.address.clone(),
                response: "SERVER_ERROR test".to_string(),
            });
        }
        self.stores
            .writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_vec()));
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}

impl StoreFactory for RecordingStores {
    fn create(&self, _shard: &ShardKey, address: &str) -> Box<dyn KeyValueStore> {
        Box::new(RecordingStore {
            address: address.to_string(),
            stores: self.clone(),
        })
    }
}

fn write_gz(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }
    encoder.finish().unwrap();
    path
}

fn valid_lines(prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let dev_type = ["idfa", "gaid", "adid", "dvid"][i % 4];
            format!("{dev_type}\t{prefix}{i}\t55.55\t42.42\t{i},7")
        })
        .collect()
}

fn test_config(dir: &Path) -> LoaderConfig {
    let mut config = LoaderConfig::default();
    config.source.pattern = format!("{}/*.tsv.gz", dir.display());
    config
}

fn done(path: &Path) -> PathBuf {
    flurry::pipeline::done_path(path).unwrap()
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_sample_lines_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(
        dir.path(),
        "sample.tsv.gz",
        &[
            "idfa\tA1\t55.55\t42.42\t1,2,3".to_string(),
            "gaid\tB2\t10.0\t20.0\tx,5".to_string(),
        ],
    );
    let stores = RecordingStores::default();
    let config = test_config(dir.path());

    let files = list_sources(&config.source.pattern).unwrap();
    let report = run_pipeline(&config, files, &stores, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stores.keys(), vec!["gaid:B2", "idfa:A1"]);

    let idfa = decode_value(&stores.value("idfa:A1").unwrap()).unwrap();
    assert_eq!(idfa.apps, vec![1, 2, 3]);
    assert_eq!(idfa.lat, Some(55.55));
    assert_eq!(idfa.lon, Some(42.42));

    let gaid = decode_value(&stores.value("gaid:B2").unwrap()).unwrap();
    assert_eq!(gaid.apps, vec![5]);
    assert_eq!(gaid.lat, Some(10.0));
    assert_eq!(gaid.lon, Some(20.0));

    let outcome = report.outcome(&path).unwrap();
    assert_eq!(outcome.status, FileStatus::Accepted);
    assert_eq!(outcome.stats.total_processed(), 2);
    assert_eq!(outcome.stats.total_errors(), 0);
    assert_eq!(outcome.done_path.as_deref(), Some(done(&path).as_path()));
    assert!(!path.exists());
    assert!(done(&path).exists());
    assert!(!report.has_rejections());
}

#[tokio::test]
async fn test_error_rate_gating() {
    let dir = TempDir::new().unwrap();

    let mut with_error = valid_lines("bad", 99);
    with_error.push("idfa\tonly-three-fields\t1.0".to_string());
    let rejected = write_gz(dir.path(), "a.tsv.gz", &with_error);
    let accepted = write_gz(dir.path(), "b.tsv.gz", &valid_lines("good", 100));

    let stores = RecordingStores::default();
    let config = test_config(dir.path());
    let files = list_sources(&config.source.pattern).unwrap();
    let report = run_pipeline(&config, files, &stores, CancellationToken::new())
        .await
        .unwrap();

    // 1 error over 99 processed records is above 1%
    let outcome = report.outcome(&rejected).unwrap();
    assert_eq!(outcome.status, FileStatus::Rejected);
    assert_eq!(outcome.stats.lines_read, 100);
    assert_eq!(outcome.stats.decode_errors, 1);
    assert_eq!(outcome.stats.total_processed(), 99);
    assert!(rejected.exists());

    let outcome = report.outcome(&accepted).unwrap();
    assert_eq!(outcome.status, FileStatus::Accepted);
    assert!(!accepted.exists());

    // Records of a rejected file are still written
    assert_eq!(stores.keys().len(), 199);
    assert_eq!(report.totals.files_accepted, 1);
    assert_eq!(report.totals.files_rejected, 1);
    assert!(report.has_rejections());
}

#[tokio::test]
async fn test_store_errors_count_against_file() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(dir.path(), "a.tsv.gz", &valid_lines("r", 100));

    let stores = RecordingStores::failing(&["idfa:r0", "gaid:r1"]);
    let config = test_config(dir.path());
    let report = run_pipeline(&config, vec![path.clone()], &stores, CancellationToken::new())
        .await
        .unwrap();

    let outcome = report.outcome(&path).unwrap();
    assert_eq!(outcome.stats.shard_errors(), 2);
    assert_eq!(outcome.stats.total_errors(), 2);
    assert_eq!(outcome.status, FileStatus::Rejected);
    assert_eq!(stores.keys().len(), 98);
}

#[tokio::test]
async fn test_unknown_destination_is_routing_error() {
    let dir = TempDir::new().unwrap();
    let mut lines = valid_lines("r", 200);
    lines.push("imei\tX\t1\t1\t1".to_string());
    let path = write_gz(dir.path(), "a.tsv.gz", &lines);

    let stores = RecordingStores::default();
    let config = test_config(dir.path());
    let report = run_pipeline(&config, vec![path.clone()], &stores, CancellationToken::new())
        .await
        .unwrap();

    let outcome = report.outcome(&path).unwrap();
    assert_eq!(outcome.stats.routing_errors, 1);
    assert_eq!(outcome.stats.total_processed(), 200);
    // 1/200 is within budget
    assert_eq!(outcome.status, FileStatus::Accepted);
}

#[tokio::test]
async fn test_unreadable_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.tsv.gz");
    let corrupt = dir.path().join("corrupt.tsv.gz");
    std::fs::write(&corrupt, b"definitely not gzip").unwrap();

    let stores = RecordingStores::default();
    let config = test_config(dir.path());
    let report = run_pipeline(
        &config,
        vec![missing.clone(), corrupt.clone()],
        &stores,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    for path in [&missing, &corrupt] {
        let outcome = report.outcome(path).unwrap();
        assert_eq!(outcome.status, FileStatus::Rejected);
        assert_eq!(outcome.stats.total_processed(), 0);
        assert!(outcome.stats.fatal.is_some());
    }
    assert!(corrupt.exists());
}

#[tokio::test]
async fn test_rerun_skips_accepted_files() {
    let dir = TempDir::new().unwrap();
    write_gz(dir.path(), "a.tsv.gz", &valid_lines("a", 10));
    let mut bad = valid_lines("b", 10);
    bad.push("garbage".to_string());
    let rejected = write_gz(dir.path(), "b.tsv.gz", &bad);

    let config = test_config(dir.path());
    let first = RecordingStores::default();
    let files = list_sources(&config.source.pattern).unwrap();
    run_pipeline(&config, files, &first, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.keys().len(), 20);

    // Only the rejected file is discovered again
    let files = list_sources(&config.source.pattern).unwrap();
    assert_eq!(files, vec![rejected.clone()]);

    let second = RecordingStores::default();
    let report = run_pipeline(&config, files, &second, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert!(second.keys().iter().all(|k| k.contains(":b")));
}

#[tokio::test]
async fn test_dry_run_skips_store_but_marks_done() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(dir.path(), "a.tsv.gz", &valid_lines("r", 40));

    let stores = RecordingStores::failing(&["idfa:r0"]);
    let mut config = test_config(dir.path());
    config.pipeline.dry_run = true;

    let report = run_pipeline(&config, vec![path.clone()], &stores, CancellationToken::new())
        .await
        .unwrap();

    let outcome = report.outcome(&path).unwrap();
    assert_eq!(outcome.status, FileStatus::Accepted);
    assert_eq!(outcome.stats.total_processed(), 40);
    assert_eq!(outcome.stats.shard_errors(), 0);
    assert!(stores.keys().is_empty());
    assert_eq!(outcome.done_path.as_deref(), Some(done(&path).as_path()));
    assert!(!path.exists());
    assert!(done(&path).exists());
}

#[tokio::test]
async fn test_strict_app_ids() {
    let dir = TempDir::new().unwrap();
    let mut lines = valid_lines("r", 10);
    lines.push("idfa\tS\t1\t1\t1,x".to_string());
    let lenient_path = write_gz(dir.path(), "lenient.tsv.gz", &lines);
    let strict_path = write_gz(dir.path(), "strict.tsv.gz", &lines);

    let mut config = test_config(dir.path());
    config.pipeline.dry_run = true;

    let lenient = run_pipeline(
        &config,
        vec![lenient_path.clone()],
        &RecordingStores::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let outcome = lenient.outcome(&lenient_path).unwrap();
    assert_eq!(outcome.stats.decode_errors, 0);
    assert_eq!(outcome.status, FileStatus::Accepted);

    config.pipeline.strict_app_ids = true;
    let strict = run_pipeline(
        &config,
        vec![strict_path.clone()],
        &RecordingStores::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let outcome = strict.outcome(&strict_path).unwrap();
    assert_eq!(outcome.stats.decode_errors, 1);
    assert_eq!(outcome.status, FileStatus::Rejected);
    assert!(strict_path.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_files_under_tight_limits() {
    let dir = TempDir::new().unwrap();
    for i in 0..6 {
        write_gz(
            dir.path(),
            &format!("{i:02}.tsv.gz"),
            &valid_lines(&format!("f{i}-"), 500),
        );
    }

    let stores = RecordingStores::default();
    let mut config = test_config(dir.path());
    config.source.batch_size = 7;
    config.source.max_concurrent_files = 3;
    config.pipeline.queue_capacity = 2;
    config.pipeline.max_in_flight = 5;

    let files = list_sources(&config.source.pattern).unwrap();
    let report = run_pipeline(&config, files, &stores, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 6);
    assert!(report.outcomes.iter().all(|o| o.status == FileStatus::Accepted));
    for outcome in &report.outcomes {
        let per_shard: u64 = outcome
            .stats
            .shard_results
            .values()
            .map(|t| t.processed)
            .sum();
        assert_eq!(per_shard, 500);
        assert_eq!(outcome.stats.shard_results.len(), 4);
    }
    assert_eq!(report.totals.processed, 3000);
    assert_eq!(stores.keys().len(), 3000);
}

#[tokio::test]
async fn test_duplicate_paths_loaded_once() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(dir.path(), "a.tsv.gz", &valid_lines("r", 4));

    let stores = RecordingStores::default();
    let config = test_config(dir.path());
    let report = run_pipeline(
        &config,
        vec![path.clone(), path.clone()],
        &stores,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(stores.keys().len(), 4);
}

#[tokio::test]
async fn test_cancelled_run_rejects_and_keeps_sources() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(dir.path(), "a.tsv.gz", &valid_lines("r", 50));

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let stores = RecordingStores::default();
    let config = test_config(dir.path());
    let report = run_pipeline(&config, vec![path.clone()], &stores, shutdown)
        .await
        .unwrap();

    let outcome = report.outcome(&path).unwrap();
    assert_eq!(outcome.status, FileStatus::Rejected);
    assert!(path.exists());
}

// ============================================================================
// Configuration
// ============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flurry.yaml");
        std::fs::write(
            &path,
            r#"
source:
  pattern: "/data/appsinstalled/*.tsv.gz"
  compression: gzip
shards:
  idfa: "10.0.0.1:33013"
  gaid: "10.0.0.1:33014"
pipeline:
  error_rate_threshold: 0.02
store:
  max_retries: 3
"#,
        )
        .unwrap();

        let config = LoaderConfig::from_file(&path).unwrap();

        assert_eq!(config.shards.len(), 2);
        assert_eq!(config.pipeline.error_rate_threshold, 0.02);
        assert_eq!(config.pipeline.max_in_flight, 1000);
        assert_eq!(config.store.max_retries, 3);
    }

    #[test]
    fn test_config_rejects_json() {
        let result = LoaderConfig::from_file(Path::new("/etc/flurry.json"));
        assert!(result.is_err());
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::store::ContentStore;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Ages after which stored data is reclaimed.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Age of files and groups, also applied to blobs no record points at
    pub file_max_age: Duration,
    /// Age of archive scratch files
    pub scratch_max_age: Duration,
    pub interval: Duration,
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub files: usize,
    pub blobs: usize,
    pub groups: usize,
    pub scratch: usize,
    pub orphans: usize,
    pub failures: usize,
}

/// Periodically deletes expired records, their blobs and stale scratch files.
pub struct RetentionSweeper {
    store: Arc<ContentStore>,
    catalog: Arc<Catalog>,
    policy: RetentionPolicy,
}

/// Running sweeper task. Stop it explicitly at shutdown.
pub struct SweeperHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!("sweeper task ended abnormally: {e}");
        }
    }
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(store: Arc<ContentStore>, catalog: Arc<Catalog>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            catalog,
            policy,
        }
    }

    /// Spawns the periodic task. The first sweep runs one interval after start.
    #[must_use]
    pub fn start(self) -> SweeperHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = self.policy.interval.max(MIN_INTERVAL);

        let join = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("sweeper started, interval {period:?}");
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                }
            }
            tracing::info!("sweeper stopped");
        });

        SweeperHandle { token, join }
    }

    /// Runs one sweep as of `now`. Failures are logged per item and never stop the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let expired = self.catalog.list_expired(now, self.policy.file_max_age);

        // Blob goes first so a live entry never outlasts its content
        for file in expired.files {
            if self.store.remove(&file.storage_path).await {
                report.blobs += 1;
                if self.catalog.delete_file(&file.file_id).is_some() {
                    report.files += 1;
                }
            } else {
                report.failures += 1;
            }
        }

        for group_id in expired.groups {
            if self.catalog.delete_group(&group_id).is_some() {
                report.groups += 1;
            }
        }

        let now = SystemTime::from(now);
        match self.store.list_scratch().await {
            Ok(files) => {
                for (path, modified) in files {
                    if !older_than(now, modified, self.policy.scratch_max_age) {
                        continue;
                    }
                    if remove_file(&path).await {
                        report.scratch += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }
            Err(e) => {
                tracing::error!("scratch directory not scanned. Error: {e}");
                report.failures += 1;
            }
        }

        let referenced = self.catalog.storage_paths();
        match self.store.list_blobs().await {
            Ok(files) => {
                for (path, modified) in files {
                    if referenced.contains(&path)
                        || !older_than(now, modified, self.policy.file_max_age)
                    {
                        continue;
                    }
                    if self.store.remove(&path).await {
                        tracing::info!("orphan blob {} removed", path.display());
                        report.orphans += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }
            Err(e) => {
                tracing::error!("blob directory not scanned. Error: {e}");
                report.failures += 1;
            }
        }

        tracing::info!(
            "sweep done. files: {} blobs: {} groups: {} scratch: {} orphans: {} failures: {}",
            report.files,
            report.blobs,
            report.groups,
            report.scratch,
            report.orphans,
            report.failures
        );
        report
    }
}

fn older_than(now: SystemTime, modified: SystemTime, max_age: Duration) -> bool {
    now.duration_since(modified).is_ok_and(|age| age > max_age)
}

async fn remove_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("{} not removed. Error: {e}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::record;
    use crate::domain::FileRecord;
    use chrono::TimeDelta;
    use std::fs;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    struct Fixture {
        _root: TempDir,
        store: Arc<ContentStore>,
        catalog: Arc<Catalog>,
        sweeper: RetentionSweeper,
    }

    async fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ContentStore::open(root.path().join("uploads"), root.path().join("temp"), 1024)
                .await
                .unwrap(),
        );
        let catalog = Arc::new(Catalog::new());
        let policy = RetentionPolicy {
            file_max_age: 24 * HOUR,
            scratch_max_age: HOUR,
            interval: HOUR,
        };
        let sweeper = RetentionSweeper::new(Arc::clone(&store), Arc::clone(&catalog), policy);
        Fixture {
            _root: root,
            store,
            catalog,
            sweeper,
        }
    }

    fn stored(store: &ContentStore, id: &str, uploaded_at: DateTime<Utc>) -> FileRecord {
        let mut file = record(id, uploaded_at);
        file.storage_path = store.blobs_dir().join(id);
        fs::write(&file.storage_path, id).unwrap();
        file
    }

    fn age(path: &Path, by: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[tokio::test]
    async fn expired_records_and_blobs_are_removed() {
        // Arrange
        let f = fixture().await;
        let now = Utc::now();
        let old = stored(&f.store, "old", now - TimeDelta::hours(25));
        let fresh = stored(&f.store, "fresh", now - TimeDelta::hours(23));
        f.catalog.register_group("g-old", vec![old.clone()]).unwrap();
        f.catalog.register_group("g-fresh", vec![fresh.clone()]).unwrap();

        // Act
        let report = f.sweeper.sweep(now).await;

        // Assert
        assert_eq!(report.files, 1);
        assert_eq!(report.blobs, 1);
        assert_eq!(report.groups, 1);
        assert_eq!(report.failures, 0);
        assert!(f.catalog.get_file("old").is_err());
        assert!(f.catalog.get_group("g-old").is_err());
        assert!(!old.storage_path.exists());
        assert!(f.catalog.get_file("fresh").is_ok());
        assert!(f.catalog.get_group("g-fresh").is_ok());
        assert!(fresh.storage_path.exists());
    }

    #[tokio::test]
    async fn missing_blob_does_not_stop_sweep() {
        // Arrange
        let f = fixture().await;
        let now = Utc::now();
        let gone = stored(&f.store, "gone", now - TimeDelta::hours(30));
        let other = stored(&f.store, "other", now - TimeDelta::hours(30));
        fs::remove_file(&gone.storage_path).unwrap();
        f.catalog.register_group("g", vec![gone, other.clone()]).unwrap();

        // Act
        let report = f.sweeper.sweep(now).await;

        // Assert
        assert_eq!(report.files, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(f.catalog.files_count(), 0);
        assert_eq!(f.catalog.groups_count(), 0);
        assert!(!other.storage_path.exists());
    }

    #[tokio::test]
    async fn stale_scratch_files_are_removed() {
        // Arrange
        let f = fixture().await;
        let stale = f.store.scratch_dir().join("stale.zip");
        let recent = f.store.scratch_dir().join("recent.zip");
        fs::write(&stale, b"x").unwrap();
        fs::write(&recent, b"x").unwrap();
        age(&stale, 2 * HOUR);

        // Act
        let report = f.sweeper.sweep(Utc::now()).await;

        // Assert
        assert_eq!(report.scratch, 1);
        assert!(!stale.exists());
        assert!(recent.exists());
    }

    #[tokio::test]
    async fn old_unreferenced_blobs_are_removed() {
        // Arrange
        let f = fixture().await;
        let orphan = f.store.blobs_dir().join("orphan.bin");
        let young_orphan = f.store.blobs_dir().join("young.bin");
        fs::write(&orphan, b"x").unwrap();
        fs::write(&young_orphan, b"x").unwrap();
        age(&orphan, 25 * HOUR);
        let kept = stored(&f.store, "kept", Utc::now());
        age(&kept.storage_path, 25 * HOUR);
        f.catalog.register_group("g", vec![kept.clone()]).unwrap();

        // Act
        let report = f.sweeper.sweep(Utc::now()).await;

        // Assert
        assert_eq!(report.orphans, 1);
        assert!(!orphan.exists());
        assert!(young_orphan.exists());
        assert!(kept.storage_path.exists());
    }

    #[tokio::test]
    async fn started_sweeper_runs_and_stops() {
        // Arrange
        let f = fixture().await;
        let old = stored(&f.store, "old", Utc::now() - TimeDelta::hours(48));
        f.catalog.register_group("g", vec![old]).unwrap();
        let handle = RetentionSweeper::new(
            Arc::clone(&f.store),
            Arc::clone(&f.catalog),
            RetentionPolicy {
                file_max_age: 24 * HOUR,
                scratch_max_age: HOUR,
                interval: MIN_INTERVAL,
            },
        )
        .start();

        // Act
        for _ in 0..50 {
            if f.catalog.files_count() == 0 && f.catalog.groups_count() == 0 {
                break;
            }
            time::sleep(Duration::from_millis(100)).await;
        }
        handle.stop().await;

        // Assert
        assert_eq!(f.catalog.files_count(), 0);
        assert_eq!(f.catalog.groups_count(), 0);
    }
}

use std::time::Instant;

use kernel::{ProgressEvent, TransferKind};
use tokio::sync::broadcast;

/// Publish-only fan out of progress events.
///
/// Every subscriber gets every event. Publishing never waits: an observer that
/// falls behind loses the oldest events and nobody else notices.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget. Having no subscribers is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Progress of one in-flight transfer.
///
/// Percentages are floored so 100 is reached only when every expected byte went
/// through, and a new event goes out only when the integer value moves.
pub struct TransferSession {
    subject_id: String,
    kind: TransferKind,
    processed: u64,
    total: u64,
    started: Instant,
    last_percentage: Option<u8>,
    file_name: Option<String>,
    total_files: Option<usize>,
    broadcaster: ProgressBroadcaster,
}

impl TransferSession {
    #[must_use]
    pub fn new(
        broadcaster: ProgressBroadcaster,
        subject_id: &str,
        kind: TransferKind,
        total: u64,
    ) -> Self {
        Self {
            subject_id: subject_id.to_owned(),
            kind,
            processed: 0,
            total,
            started: Instant::now(),
            last_percentage: None,
            file_name: None,
            total_files: None,
            broadcaster,
        }
    }

    #[must_use]
    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn with_total_files(mut self, count: usize) -> Self {
        self.total_files = Some(count);
        self
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed
    }

    #[must_use]
    pub fn percentage(&self) -> u8 {
        percentage(self.processed, self.total)
    }

    /// Accounts for `bytes` more and publishes if the percentage moved.
    pub fn advance(&mut self, bytes: u64) {
        self.processed = self.processed.saturating_add(bytes);
        let current = self.percentage();
        if self.last_percentage != Some(current) {
            self.emit(current);
        }
    }

    /// Publishes the final 100 unless it already went out.
    pub fn finish(&mut self) {
        if self.last_percentage != Some(100) {
            self.emit(100);
        }
    }

    fn emit(&mut self, percentage: u8) {
        self.last_percentage = Some(percentage);
        self.broadcaster.publish(ProgressEvent {
            subject_id: self.subject_id.clone(),
            kind: self.kind,
            percentage,
            throughput: self.throughput(),
            file_name: self.file_name.clone(),
            total_files: self.total_files,
        });
    }

    #[allow(clippy::cast_precision_loss)]
    fn throughput(&self) -> Option<f64> {
        let elapsed = self.started.elapsed().as_secs_f64();
        (elapsed > 0.0).then(|| self.processed as f64 / elapsed)
    }
}

/// Floored percentage of `processed` over `total`, capped at 100.
#[must_use]
pub fn percentage(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let value = u128::from(processed) * 100 / u128::from(total);
    u8::try_from(value.min(100)).unwrap_or(100)
}

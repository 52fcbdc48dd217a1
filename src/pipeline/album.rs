//! Debounced collection of album parts.
//!
//! Telegram delivers every photo of an album as its own update. The aggregator
//! buffers them per media-group id and, once the burst has been quiet for the
//! configured delay, hands the whole album to an [`AlbumSink`] exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::{AttachmentRef, MessageRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumItem {
    pub origin: MessageRef,
    pub caption: Option<String>,
    pub photo: AttachmentRef,
}

#[async_trait]
pub trait AlbumSink: Send + Sync {
    async fn process_album(
        &self,
        first: MessageRef,
        photos: Vec<AttachmentRef>,
        caption: String,
    ) -> anyhow::Result<()>;

    async fn report_missing_caption(&self, first: MessageRef);

    async fn report_failure(&self, first: MessageRef, detail: &str);
}

#[derive(Default)]
struct GroupStore {
    pending: HashMap<String, Vec<AlbumItem>>,
    scheduled: HashSet<String>,
}

/// Removes a group from both maps when finalize ends, unwinding included.
struct GroupCleanup<'a> {
    store: &'a Mutex<GroupStore>,
    group_id: &'a str,
}

impl Drop for GroupCleanup<'_> {
    fn drop(&mut self) {
        let mut store = self.store.lock();
        store.pending.remove(self.group_id);
        store.scheduled.remove(self.group_id);
    }
}

struct AggregatorInner {
    store: Mutex<GroupStore>,
    sink: Arc<dyn AlbumSink>,
    delay: Duration,
}

#[derive(Clone)]
pub struct MediaGroupAggregator {
    inner: Arc<AggregatorInner>,
}

fn first_caption(items: &[AlbumItem]) -> Option<String> {
    items
        .iter()
        .filter_map(|item| item.caption.as_deref())
        .map(str::trim)
        .find(|caption| !caption.is_empty())
        .map(str::to_string)
}

impl MediaGroupAggregator {
    pub fn new(sink: Arc<dyn AlbumSink>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                store: Mutex::new(GroupStore::default()),
                sink,
                delay,
            }),
        }
    }

    /// Buffers one album part. The first part of an unseen group schedules the
    /// delayed finalize and gets its task handle back; later parts get `None`.
    pub fn on_attachment(&self, group_id: &str, item: AlbumItem) -> Option<JoinHandle<()>> {
        let schedule = {
            let mut store = self.inner.store.lock();
            let parts = store.pending.entry(group_id.to_string()).or_default();
            parts.push(item);
            debug!("Album {} now has {} part(s)", group_id, parts.len());
            store.scheduled.insert(group_id.to_string())
        };
        if !schedule {
            return None;
        }

        let aggregator = self.clone();
        let group_id = group_id.to_string();
        Some(tokio::spawn(async move {
            tokio::time::sleep(aggregator.inner.delay).await;
            aggregator.finalize(&group_id).await;
        }))
    }

    pub async fn finalize(&self, group_id: &str) {
        let _cleanup = GroupCleanup {
            store: &self.inner.store,
            group_id,
        };

        let items = self
            .inner
            .store
            .lock()
            .pending
            .get(group_id)
            .cloned()
            .unwrap_or_default();
        let Some(first) = items.first().map(|item| item.origin) else {
            debug!("Album {} has nothing pending", group_id);
            return;
        };

        let Some(caption) = first_caption(&items) else {
            warn!("Album {} arrived without a caption", group_id);
            self.inner.sink.report_missing_caption(first).await;
            return;
        };

        info!(
            "Processing album {} with {} photo(s)",
            group_id,
            items.len()
        );
        let photos = items.into_iter().map(|item| item.photo).collect();
        if let Err(err) = self.inner.sink.process_album(first, photos, caption).await {
            error!("Album {} failed: {:#}", group_id, err);
            self.inner
                .sink
                .report_failure(first, &format!("{err:#}"))
                .await;
        }
    }

    #[cfg(test)]
    fn is_tracking(&self, group_id: &str) -> bool {
        let store = self.inner.store.lock();
        store.pending.contains_key(group_id) || store.scheduled.contains(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum SinkCall {
        Album {
            first: MessageRef,
            file_ids: Vec<String>,
            caption: String,
        },
        MissingCaption(MessageRef),
        Failure(MessageRef, String),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<SinkCall>>,
        fail_with: Option<String>,
        panic: bool,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl AlbumSink for RecordingSink {
        async fn process_album(
            &self,
            first: MessageRef,
            photos: Vec<AttachmentRef>,
            caption: String,
        ) -> anyhow::Result<()> {
            if self.panic {
                panic!("sink exploded");
            }
            self.calls.lock().push(SinkCall::Album {
                first,
                file_ids: photos.into_iter().map(|photo| photo.file_id).collect(),
                caption,
            });
            match &self.fail_with {
                Some(message) => Err(anyhow::anyhow!(message.clone())),
                None => Ok(()),
            }
        }

        async fn report_missing_caption(&self, first: MessageRef) {
            self.calls.lock().push(SinkCall::MissingCaption(first));
        }

        async fn report_failure(&self, first: MessageRef, detail: &str) {
            self.calls
                .lock()
                .push(SinkCall::Failure(first, detail.to_string()));
        }
    }

    const DELAY: Duration = Duration::from_millis(1500);

    fn part(message_id: i32, caption: &str) -> AlbumItem {
        AlbumItem {
            origin: MessageRef::new(7, message_id),
            caption: (!caption.is_empty()).then(|| caption.to_string()),
            photo: AttachmentRef::new(format!("photo-{message_id}"), Some(1024)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_finalized_once_with_the_first_caption() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);

        let handle = aggregator.on_attachment("g1", part(1, "")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(aggregator
            .on_attachment("g1", part(2, "describe the scene"))
            .is_none());
        assert!(aggregator.on_attachment("g1", part(3, "ignored")).is_none());
        handle.await.unwrap();

        assert_eq!(
            sink.calls(),
            vec![SinkCall::Album {
                first: MessageRef::new(7, 1),
                file_ids: vec!["photo-1".into(), "photo-2".into(), "photo-3".into()],
                caption: "describe the scene".into(),
            }]
        );
        assert!(!aggregator.is_tracking("g1"));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_runs_before_the_delay() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);
        let handle = aggregator.on_attachment("g1", part(1, "caption")).unwrap();

        tokio::time::sleep(DELAY - Duration::from_millis(1)).await;
        assert!(sink.calls().is_empty());
        assert!(aggregator.is_tracking("g1"));

        handle.await.unwrap();
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn album_without_caption_is_reported_not_processed() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);
        let handle = aggregator.on_attachment("g1", part(4, "  ")).unwrap();
        aggregator.on_attachment("g1", part(5, ""));
        handle.await.unwrap();

        assert_eq!(
            sink.calls(),
            vec![SinkCall::MissingCaption(MessageRef::new(7, 4))]
        );
        assert!(!aggregator.is_tracking("g1"));
    }

    #[tokio::test]
    async fn finalize_of_an_unknown_group_is_a_no_op() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);
        aggregator.finalize("never-seen").await;
        assert!(sink.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_finalize_after_cleanup_does_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);
        aggregator
            .on_attachment("g1", part(1, "caption"))
            .unwrap()
            .await
            .unwrap();
        aggregator.finalize("g1").await;
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn processing_errors_are_reported_to_the_first_message() {
        let sink = Arc::new(RecordingSink {
            fail_with: Some("boom".into()),
            ..RecordingSink::default()
        });
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);
        let handle = aggregator.on_attachment("g1", part(9, "caption")).unwrap();
        aggregator.on_attachment("g1", part(10, ""));
        handle.await.unwrap();

        assert_eq!(
            sink.calls().last(),
            Some(&SinkCall::Failure(MessageRef::new(7, 9), "boom".into()))
        );
        assert!(!aggregator.is_tracking("g1"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sink_still_releases_the_group() {
        let sink = Arc::new(RecordingSink {
            panic: true,
            ..RecordingSink::default()
        });
        let aggregator = MediaGroupAggregator::new(sink, DELAY);
        let handle = aggregator.on_attachment("g1", part(1, "caption")).unwrap();
        assert!(handle.await.is_err());
        assert!(!aggregator.is_tracking("g1"));

        // The id can be used again once released.
        assert!(aggregator.on_attachment("g1", part(2, "caption")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn groups_are_independent() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = MediaGroupAggregator::new(sink.clone(), DELAY);
        let first = aggregator.on_attachment("a", part(1, "first")).unwrap();
        let second = aggregator.on_attachment("b", part(2, "second")).unwrap();
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(sink.calls().len(), 2);
    }
}

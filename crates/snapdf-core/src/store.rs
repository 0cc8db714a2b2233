//! Per-conversation image queues.
//!
//! A [`ConversationStore`] maps a conversation id to the ordered list of
//! images received in it. An entry exists only while at least one image is
//! queued. All mutations lock a single key (shard) for the duration of a
//! synchronous update, so the store is safe to share between tasks and never
//! holds a lock across an `.await`.

use std::path::PathBuf;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Opaque chat identifier supplied by the messaging platform.
pub type ConversationId = i64;

/// One received image, stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: PathBuf,
    /// Platform-provided identifier the file name was derived from.
    pub source_id: String,
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    queues: DashMap<ConversationId, Vec<ImageRef>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `image` to the conversation's queue, creating it if absent.
    /// Returns the queue length after the append.
    pub fn append(&self, conversation: ConversationId, image: ImageRef) -> usize {
        let mut queue = self.queues.entry(conversation).or_default();
        queue.push(image);
        queue.len()
    }

    /// Returns a copy of the conversation's queue in receipt order.
    /// Empty when the conversation has no queue.
    pub fn snapshot(&self, conversation: ConversationId) -> Vec<ImageRef> {
        self.queues
            .get(&conversation)
            .map(|queue| queue.value().clone())
            .unwrap_or_default()
    }

    /// Removes the images a previous [`snapshot`](Self::snapshot) handed out
    /// and drops the entry once it is empty. Each delivered image removes at
    /// most one matching entry; images appended after the snapshot, or
    /// already removed by someone else, are left alone.
    ///
    /// Returns the number of images still queued.
    pub fn release(&self, conversation: ConversationId, delivered: &[ImageRef]) -> usize {
        match self.queues.entry(conversation) {
            Entry::Occupied(mut entry) => {
                let queue = entry.get_mut();
                for image in delivered {
                    if let Some(position) = queue.iter().position(|queued| queued == image) {
                        queue.remove(position);
                    }
                }
                let remaining = queue.len();
                if remaining == 0 {
                    entry.remove();
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// Removes and returns the whole queue.
    pub fn take(&self, conversation: ConversationId) -> Vec<ImageRef> {
        self.queues
            .remove(&conversation)
            .map(|(_, queue)| queue)
            .unwrap_or_default()
    }

    pub fn len(&self, conversation: ConversationId) -> usize {
        self.queues.get(&conversation).map_or(0, |queue| queue.len())
    }

    pub fn contains(&self, conversation: ConversationId) -> bool {
        self.queues.contains_key(&conversation)
    }

    /// Number of conversations with a non-empty queue.
    pub fn conversation_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn image(conversation: ConversationId, source_id: &str) -> ImageRef {
        ImageRef {
            path: PathBuf::from(format!("images/{conversation}_{source_id}.jpg")),
            source_id: source_id.to_string(),
        }
    }

    fn source_ids(images: &[ImageRef]) -> Vec<&str> {
        images.iter().map(|image| image.source_id.as_str()).collect()
    }

    #[test]
    fn append_keeps_receipt_order() {
        let store = ConversationStore::new();
        assert_eq!(store.append(1, image(1, "a")), 1);
        assert_eq!(store.append(1, image(1, "b")), 2);
        assert_eq!(store.append(1, image(1, "c")), 3);

        assert_eq!(source_ids(&store.snapshot(1)), ["a", "b", "c"]);
    }

    #[test]
    fn absent_conversation_stays_absent() {
        let store = ConversationStore::new();
        assert!(store.snapshot(7).is_empty());
        assert_eq!(store.release(7, &[image(7, "a")]), 0);
        assert!(store.take(7).is_empty());
        assert!(!store.contains(7));
        assert_eq!(store.conversation_count(), 0);
    }

    #[test]
    fn release_of_full_snapshot_removes_entry() {
        let store = ConversationStore::new();
        store.append(1, image(1, "a"));
        store.append(1, image(1, "b"));

        let snapshot = store.snapshot(1);
        assert_eq!(store.release(1, &snapshot), 0);
        assert!(!store.contains(1));
        assert_eq!(store.len(1), 0);
    }

    #[test]
    fn release_keeps_images_appended_after_snapshot() {
        let store = ConversationStore::new();
        store.append(1, image(1, "a"));
        store.append(1, image(1, "b"));
        let snapshot = store.snapshot(1);

        store.append(1, image(1, "late"));

        assert_eq!(store.release(1, &snapshot), 1);
        assert_eq!(source_ids(&store.snapshot(1)), ["late"]);
    }

    #[test]
    fn release_never_removes_images_outside_the_snapshot() {
        let store = ConversationStore::new();
        store.append(1, image(1, "a"));
        store.append(1, image(1, "b"));
        let snapshot = store.snapshot(1);

        store.take(1);
        store.append(1, image(1, "late"));

        assert_eq!(store.release(1, &snapshot), 1);
        assert_eq!(source_ids(&store.snapshot(1)), ["late"]);
    }

    #[test]
    fn release_removes_one_entry_per_delivered_duplicate() {
        let store = ConversationStore::new();
        store.append(1, image(1, "a"));
        let snapshot = store.snapshot(1);
        store.append(1, image(1, "a"));

        assert_eq!(store.release(1, &snapshot), 1);
        assert_eq!(source_ids(&store.snapshot(1)), ["a"]);
    }

    #[test]
    fn take_empties_only_that_conversation() {
        let store = ConversationStore::new();
        store.append(1, image(1, "a"));
        store.append(2, image(2, "b"));

        assert_eq!(source_ids(&store.take(1)), ["a"]);
        assert!(!store.contains(1));
        assert_eq!(source_ids(&store.snapshot(2)), ["b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_do_not_cross_conversations() {
        let store = Arc::new(ConversationStore::new());
        let mut handles = Vec::new();
        for conversation in 0..8_i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    store.append(conversation, image(conversation, &format!("{conversation}-{n}")));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.conversation_count(), 8);
        for conversation in 0..8_i64 {
            let queue = store.snapshot(conversation);
            let expected: Vec<String> = (0..50).map(|n| format!("{conversation}-{n}")).collect();
            assert_eq!(
                queue.iter().map(|i| i.source_id.clone()).collect::<Vec<_>>(),
                expected
            );
        }
    }
}

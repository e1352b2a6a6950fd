//! crates/inbox_assistant_core/src/sync.rs
//!
//! Ingests inbound mail into the store and keeps stored messages classified.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classification::{ClassificationGuard, Classifier};
use crate::domain::{AnalysisResult, InboundMessage, Message};
use crate::ports::{MessageStore, PortResult};
use crate::relevance::RelevanceGate;

pub const DEFAULT_UPSERT_BATCH: usize = 2;

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Messages classified and written to the store.
    pub synced: usize,
    /// Inbound messages rejected by the relevance gate.
    pub skipped: usize,
    /// Stored rows deleted because they were judged irrelevant.
    pub purged: u64,
}

pub struct InboxSync {
    store: Arc<dyn MessageStore>,
    gate: RelevanceGate,
    classifier: Classifier,
    guard: Arc<ClassificationGuard>,
    batch_size: usize,
}

impl InboxSync {
    pub fn new(
        store: Arc<dyn MessageStore>,
        gate: RelevanceGate,
        classifier: Classifier,
        guard: Arc<ClassificationGuard>,
    ) -> Self {
        Self {
            store,
            gate,
            classifier,
            guard,
            batch_size: DEFAULT_UPSERT_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Gates, classifies and stores `inbound`.
    ///
    /// Relevant messages already in the store are left alone. Irrelevant ones are
    /// counted as skipped and, with `purge_irrelevant`, deleted if a previous sync
    /// stored them. Store errors abort the run.
    pub async fn sync(
        &self,
        user_id: Uuid,
        inbound: Vec<InboundMessage>,
        purge_irrelevant: bool,
    ) -> PortResult<SyncReport> {
        let existing: HashSet<String> = self.store.existing_message_ids(user_id).await?.into_iter().collect();
        let mut report = SyncReport::default();
        let mut irrelevant_ids = Vec::new();
        let mut pending: Vec<Message> = Vec::with_capacity(self.batch_size);

        for message in inbound {
            let verdict = self.gate.assess(&message).await;
            if !verdict.relevant {
                debug!(id = %message.id, reason = ?verdict.reason, "Skipping irrelevant message.");
                report.skipped += 1;
                irrelevant_ids.push(message.id);
                continue;
            }
            if existing.contains(&message.id) {
                continue;
            }

            let analysis = match self.guard.try_acquire(&message.id) {
                Some(_claim) => settled(self.classifier.classify(&message.body).await),
                // Stored unclassified; the backfill picks it up.
                None => AnalysisResult::default(),
            };
            pending.push(message.into_message(analysis));

            if pending.len() >= self.batch_size {
                self.store.upsert_messages(user_id, &pending).await?;
                report.synced += pending.len();
                pending.clear();
            }
        }
        if !pending.is_empty() {
            self.store.upsert_messages(user_id, &pending).await?;
            report.synced += pending.len();
        }

        if purge_irrelevant && !irrelevant_ids.is_empty() {
            report.purged = self.store.delete_messages(user_id, &irrelevant_ids).await?;
        }

        info!(
            %user_id,
            synced = report.synced,
            skipped = report.skipped,
            purged = report.purged,
            "Inbox sync finished."
        );
        Ok(report)
    }

    /// Classifies one stored message and persists the result.
    ///
    /// Returns `Ok(None)` when the message is already being classified elsewhere.
    pub async fn classify_message(&self, user_id: Uuid, message_id: &str) -> PortResult<Option<AnalysisResult>> {
        let Some(_claim) = self.guard.try_acquire(message_id) else {
            return Ok(None);
        };
        let message = self.store.get_message(user_id, message_id).await?;
        let analysis = settled(self.classifier.classify(&message.body).await);
        self.store.update_analysis(user_id, message_id, &analysis).await?;
        Ok(Some(analysis))
    }

    /// Classifies every stored message still carrying the default analysis.
    ///
    /// Messages claimed by another run are skipped. Returns how many were classified.
    pub async fn classify_pending(&self, user_id: Uuid) -> PortResult<usize> {
        let messages = self.store.list_messages(user_id).await?;
        let mut classified = 0;
        for message in messages.iter().filter(|m| m.is_pending_classification()) {
            let Some(_claim) = self.guard.try_acquire(&message.id) else {
                debug!(id = %message.id, "Already being classified.");
                continue;
            };
            let analysis = settled(self.classifier.classify(&message.body).await);
            if let Err(e) = self.store.update_analysis(user_id, &message.id, &analysis).await {
                warn!(id = %message.id, error = %e, "Failed to store classification.");
                continue;
            }
            classified += 1;
        }
        info!(%user_id, classified, "Pending classification backfill finished.");
        Ok(classified)
    }
}

/// Tags an untagged result with its category so the stored row no longer reads as pending.
fn settled(mut analysis: AnalysisResult) -> AnalysisResult {
    if analysis.tags.is_empty() {
        analysis.tags.push(analysis.category.to_string());
    }
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BusinessPolicy, MessageCategory};
    use crate::ports::PortError;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        messages: Mutex<Vec<Message>>,
        upsert_batches: Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl MessageStore for MemoryStore {
        async fn list_messages(&self, _u: Uuid) -> PortResult<Vec<Message>> {
            Ok(self.messages.lock().unwrap().clone())
        }
        async fn get_message(&self, _u: Uuid, id: &str) -> PortResult<Message> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| PortError::NotFound(id.to_string()))
        }
        async fn existing_message_ids(&self, _u: Uuid) -> PortResult<Vec<String>> {
            Ok(self.messages.lock().unwrap().iter().map(|m| m.id.clone()).collect())
        }
        async fn upsert_messages(&self, _u: Uuid, messages: &[Message]) -> PortResult<()> {
            self.upsert_batches.lock().unwrap().push(messages.len());
            let mut stored = self.messages.lock().unwrap();
            for m in messages {
                stored.retain(|s| s.id != m.id);
                stored.push(m.clone());
            }
            Ok(())
        }
        async fn update_analysis(&self, _u: Uuid, id: &str, analysis: &AnalysisResult) -> PortResult<()> {
            let mut stored = self.messages.lock().unwrap();
            let message = stored
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| PortError::NotFound(id.to_string()))?;
            message.apply_analysis(analysis);
            Ok(())
        }
        async fn save_suggested_reply(&self, _u: Uuid, _id: &str, _r: &str) -> PortResult<()> {
            Ok(())
        }
        async fn mark_replied(&self, _u: Uuid, _ids: &[String]) -> PortResult<()> {
            Ok(())
        }
        async fn delete_messages(&self, _u: Uuid, ids: &[String]) -> PortResult<u64> {
            let mut stored = self.messages.lock().unwrap();
            let before = stored.len();
            stored.retain(|m| !ids.contains(&m.id));
            Ok((before - stored.len()) as u64)
        }
        async fn list_policies(&self, _u: Uuid) -> PortResult<Vec<BusinessPolicy>> {
            Ok(vec![])
        }
        async fn create_policy(
            &self,
            _u: Uuid,
            title: &str,
            content: &str,
            category: Option<&str>,
        ) -> PortResult<BusinessPolicy> {
            Ok(BusinessPolicy {
                id: "p1".into(),
                title: title.into(),
                content: content.into(),
                category: category.map(str::to_string),
            })
        }
        async fn update_policy(&self, _u: Uuid, _p: &BusinessPolicy) -> PortResult<()> {
            Ok(())
        }
        async fn delete_policy(&self, _u: Uuid, _id: &str) -> PortResult<()> {
            Ok(())
        }
    }

    fn inbound(id: &str, subject: &str, body: &str, labels: &[&str]) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            thread_id: None,
            from: "Jane Doe <jane@example.com>".into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn sync_over(store: Arc<MemoryStore>, guard: Arc<ClassificationGuard>) -> InboxSync {
        InboxSync::new(store, RelevanceGate::new(vec![]), Classifier::new(vec![]), guard)
    }

    #[tokio::test]
    async fn sync_gates_classifies_and_batches() {
        let store = Arc::new(MemoryStore::default());
        let sync = sync_over(store.clone(), Arc::new(ClassificationGuard::new()));
        let report = sync
            .sync(
                Uuid::new_v4(),
                vec![
                    inbound("a", "Where is my order?", "No tracking yet for my package", &["UNREAD"]),
                    inbound("b", "Sale!", "50% off everything", &["CATEGORY_PROMOTIONS"]),
                    inbound("c", "Refund", "I want to return this", &[]),
                    inbound("d", "Damaged", "Arrived broken", &[]),
                ],
                false,
            )
            .await
            .unwrap();

        assert_eq!(report, SyncReport { synced: 3, skipped: 1, purged: 0 });
        assert_eq!(*store.upsert_batches.lock().unwrap(), vec![2, 1]);
        let stored = store.messages.lock().unwrap();
        let a = stored.iter().find(|m| m.id == "a").unwrap();
        assert_eq!(a.category, MessageCategory::Shipping);
        assert!(!a.is_read);
        assert_eq!(a.sender_name, "Jane Doe");
    }

    #[tokio::test]
    async fn sync_skips_stored_ids_and_purges_irrelevant_rows() {
        let store = Arc::new(MemoryStore::default());
        let user = Uuid::new_v4();
        let sync = sync_over(store.clone(), Arc::new(ClassificationGuard::new()));
        sync.sync(user, vec![inbound("a", "Order", "Where is my order", &[])], false)
            .await
            .unwrap();
        store
            .upsert_messages(user, &[inbound("spam", "Order", "x", &[]).into_message(AnalysisResult::default())])
            .await
            .unwrap();

        let report = sync
            .sync(
                user,
                vec![
                    inbound("a", "Order", "Where is my order", &[]),
                    inbound("spam", "Order", "x", &["SPAM"]),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(report, SyncReport { synced: 0, skipped: 1, purged: 1 });
        let ids: Vec<String> = store.messages.lock().unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn in_flight_message_is_stored_unclassified() {
        let store = Arc::new(MemoryStore::default());
        let guard = Arc::new(ClassificationGuard::new());
        let _claim = guard.try_acquire("a").unwrap();
        let sync = sync_over(store.clone(), guard.clone());
        sync.sync(Uuid::new_v4(), vec![inbound("a", "Refund", "I want a refund", &[])], false)
            .await
            .unwrap();
        assert!(store.messages.lock().unwrap()[0].is_pending_classification());
    }

    #[tokio::test]
    async fn classify_message_reports_in_flight_and_persists() {
        let store = Arc::new(MemoryStore::default());
        let user = Uuid::new_v4();
        store
            .upsert_messages(
                user,
                &[inbound("a", "Refund", "Can I get a refund please", &[]).into_message(AnalysisResult::default())],
            )
            .await
            .unwrap();
        let guard = Arc::new(ClassificationGuard::new());
        let sync = sync_over(store.clone(), guard.clone());

        let claim = guard.try_acquire("a").unwrap();
        assert_eq!(sync.classify_message(user, "a").await.unwrap(), None);
        drop(claim);

        let analysis = sync.classify_message(user, "a").await.unwrap().unwrap();
        assert_eq!(analysis.category, MessageCategory::Returns);
        assert_eq!(store.messages.lock().unwrap()[0].category, MessageCategory::Returns);
        assert!(matches!(
            sync.classify_message(user, "missing").await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn backfill_classifies_only_pending_messages() {
        let store = Arc::new(MemoryStore::default());
        let user = Uuid::new_v4();
        let mut done = inbound("done", "x", "Refund please", &[]).into_message(AnalysisResult::default());
        done.tags = vec!["Refund".into()];
        store
            .upsert_messages(
                user,
                &[
                    done,
                    inbound("p1", "x", "Where is my package", &[]).into_message(AnalysisResult::default()),
                    inbound("p2", "x", "hello", &[]).into_message(AnalysisResult::default()),
                ],
            )
            .await
            .unwrap();
        let sync = sync_over(store.clone(), Arc::new(ClassificationGuard::new()));
        assert_eq!(sync.classify_pending(user).await.unwrap(), 2);
        {
            let stored = store.messages.lock().unwrap();
            assert_eq!(stored.iter().find(|m| m.id == "p1").unwrap().category, MessageCategory::Shipping);
            let p2 = stored.iter().find(|m| m.id == "p2").unwrap();
            assert_eq!(p2.category, MessageCategory::General);
            assert_eq!(p2.tags, vec!["General".to_string()]);
        }
        // Inconclusive results are not retried on the next backfill.
        assert_eq!(sync.classify_pending(user).await.unwrap(), 0);
    }
}

//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use inbox_assistant_core::{
    classification::{ClassificationGuard, Classifier},
    drafting::DraftComposer,
    ports::{EmbeddingService, LanguageModelService, MessageStore},
    relevance::RelevanceGate,
    similarity::SimilarityPipeline,
    sync::InboxSync,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub config: Arc<Config>,
    pub similarity: Arc<SimilarityPipeline>,
    pub composer: Arc<DraftComposer>,
    pub inbox: Arc<InboxSync>,
    /// Ids currently being classified, shared by sync and the classify endpoints.
    pub guard: Arc<ClassificationGuard>,
}

impl AppState {
    /// Wires the pipelines over the given store and providers.
    ///
    /// `models` and `embedders` are in priority order.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MessageStore>,
        models: Vec<Arc<dyn LanguageModelService>>,
        embedders: Vec<Arc<dyn EmbeddingService>>,
    ) -> Self {
        let guard = Arc::new(ClassificationGuard::new());
        let similarity = SimilarityPipeline::new(config.similarity.clone(), embedders, models.clone());
        let composer = DraftComposer::new(
            models.clone(),
            config.business_name.clone(),
            config.reply_signature.clone(),
        );
        let inbox = InboxSync::new(
            store.clone(),
            RelevanceGate::new(models.clone()),
            Classifier::new(models),
            guard.clone(),
        );
        Self {
            store,
            config,
            similarity: Arc::new(similarity),
            composer: Arc::new(composer),
            inbox: Arc::new(inbox),
            guard,
        }
    }
}

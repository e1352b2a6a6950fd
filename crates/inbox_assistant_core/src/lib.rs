pub mod classification;
pub mod domain;
pub mod drafting;
pub mod filter;
pub mod ports;
pub mod relevance;
pub mod similarity;
pub mod sync;
pub mod text;
pub mod tfidf;

pub use classification::{ClassificationGuard, Classifier, InFlight};
pub use domain::{
    AnalysisResult, BusinessPolicy, Channel, InboundMessage, Message, MessageCategory, ResponseCost, Sentiment,
    UnknownVariant,
};
pub use drafting::{plan_bulk_reply, DraftComposer, OutgoingReply};
pub use filter::filter_messages;
pub use ports::{
    CandidateText, DraftRequest, EmbeddingService, LanguageModelService, MessageStore, PortError, PortResult,
    RelevanceVerdict,
};
pub use relevance::RelevanceGate;
pub use similarity::{SimilarityConfig, SimilarityPipeline, SimilarityStrategy};
pub use sync::{InboxSync, SyncReport};
pub use tfidf::TfIdfEmbedder;

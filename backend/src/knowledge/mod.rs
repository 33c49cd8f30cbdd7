pub mod knowledge_base;

pub use knowledge_base::{KnowledgeBase, KnowledgeBaseError, normalize_key, title_case};

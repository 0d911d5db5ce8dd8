//! kb-rag - 개인 지식베이스 + RAG 질의응답
//!
//! 텍스트를 청킹/임베딩하여 LanceDB에 저장하고,
//! 시맨틱 검색 결과를 근거로 LLM 답변을 생성합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod rag;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{get_data_dir, Config};
pub use embedding::{EmbeddingProvider, OpenAiEmbedding};
pub use error::{KbError, Result};
pub use knowledge::{
    default_chunker, split_text, Chunker, DeleteOutcome, KnowledgeBase, LanceIndex, NewItem,
    RawStore, SearchResponse, SearchResult, TextSplitter, UpdateOutcome, VectorIndex,
};
pub use llm::{ChatClient, GenerationService};
pub use rag::{RagAnswer, RagService, SourceRef};

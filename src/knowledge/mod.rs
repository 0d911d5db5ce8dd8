//! Knowledge 모듈 - 청킹 + 벡터 인덱스 + 지식베이스
//!
//! - Chunker: 오버랩 + 자연 경계 텍스트 분할
//! - VectorIndex: 영속 벡터 인덱스 트레이트 (LanceDB 구현)
//! - KnowledgeBase: 항목 단위 추가/검색/목록/삭제/통계
//! - RawStore: 청킹 전 원문 Markdown 보관

mod chunker;
mod index;
mod lance;
mod raw;
mod store;

// Re-exports
pub use chunker::{default_chunker, split_text, Chunker, TextSplitter};
pub use index::{
    parse_tags, ChunkRecord, IndexEntry, MetadataFilter, MetadataUpdate, Neighbor, VectorIndex,
};
pub use lance::LanceIndex;
pub use raw::{RawDocument, RawStore};
pub use store::{
    distance_to_relevance, AddedItem, DeleteOutcome, ItemList, ItemSummary, KnowledgeBase,
    KnowledgeItem, KnowledgeStats, NewItem, SearchResponse, SearchResult, UpdateOutcome,
};

//! Knowledge Base - 지식 항목 단위의 벡터 저장소
//!
//! 하나의 지식 항목(item)은 1..N개의 청크로 저장됩니다.
//! 임베딩 프로바이더와 벡터 인덱스를 직접 다루는 유일한 컴포넌트입니다.
//!
//! - add: 청킹 → 배치 임베딩 → 인덱스에 한 번에 upsert
//! - search: 질의 임베딩 → 최근접 이웃 → 거리를 관련도로 변환
//! - list / get / delete / stats: 메타데이터 스캔 및 항목 단위 집계

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{ChunkingConfig, Config, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{KbError, Result, UpstreamExt};

use super::chunker::{default_chunker, Chunker};
use super::index::{
    parse_tags, ChunkRecord, IndexEntry, MetadataFilter, MetadataUpdate, VectorIndex,
};
use super::lance::LanceIndex;

/// 목록 미리보기 길이 (문자 수)
const PREVIEW_CHARS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// 새 지식 항목 입력
#[derive(Debug, Clone)]
pub struct NewItem {
    pub content: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source: String,
}

/// add 결과
#[derive(Debug, Clone, Serialize)]
pub struct AddedItem {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub chunk_count: usize,
}

/// 검색 결과 (청크 단위)
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub item_id: String,
    pub chunk_index: i32,
    pub text: String,
    /// 관련도 (0.0 ~ 1.0, 소수점 4자리)
    pub relevance: f32,
    pub title: String,
    pub tags: Vec<String>,
    pub source: String,
}

/// search 응답
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_results: usize,
    pub results: Vec<SearchResult>,
    /// 지식베이스가 비어 있어 검색하지 않았음
    pub empty: bool,
}

/// 목록 항목
#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source: String,
    pub total_chunks: i32,
    pub preview: String,
}

/// list 응답
#[derive(Debug, Clone, Serialize)]
pub struct ItemList {
    pub total_items: usize,
    /// 컬렉션 전체 청크 수
    pub total_chunks: usize,
    pub items: Vec<ItemSummary>,
}

/// 저장된 지식 항목 (청크 포함)
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    /// chunk_index 순
    pub chunks: Vec<ChunkRecord>,
}

/// delete 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteOutcome {
    NotFound,
    Deleted { chunks: usize },
}

/// update 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateOutcome {
    NotFound,
    Updated { chunks: usize },
}

/// 저장소 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeStats {
    pub total_items: usize,
    pub total_chunks: usize,
    /// 태그별 청크 수
    pub tags: BTreeMap<String, usize>,
    /// 출처별 청크 수
    pub sources: BTreeMap<String, usize>,
}

// ============================================================================
// KnowledgeBase
// ============================================================================

/// 지식베이스 핸들
///
/// 프로세스 시작 시 한 번 만들어 참조(또는 `Arc`)로 공유합니다.
pub struct KnowledgeBase {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Box<dyn Chunker>,
    max_top_k: usize,
}

impl KnowledgeBase {
    /// 구성 요소를 직접 지정하여 생성
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: &ChunkingConfig,
        retrieval: &RetrievalConfig,
    ) -> Result<Self> {
        if retrieval.max_top_k == 0 {
            return Err(KbError::invalid("retrieval.max_top_k must be > 0"));
        }
        Ok(Self {
            index,
            embedder,
            chunker: default_chunker(chunking)?,
            max_top_k: retrieval.max_top_k,
        })
    }

    /// 설정의 데이터 디렉토리에서 LanceDB 인덱스를 열어 생성
    pub async fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let index = LanceIndex::open(&config.lance_path(), embedder.dimension())
            .await
            .upstream("index.open")?;
        tracing::info!(
            "Knowledge base opened at {} (embedder: {})",
            config.lance_path().display(),
            embedder.name()
        );
        Self::new(Arc::new(index), embedder, &config.chunking, &config.retrieval)
    }

    /// 지식 항목 추가 (전부 성공하거나 전부 실패)
    pub async fn add(&self, item: NewItem) -> Result<AddedItem> {
        let id = new_item_id();
        let tags = normalize_tags(&item.tags);
        let chunk_count = self
            .store_chunks(&id, &item.content, &item.title, &tags, &item.source)
            .await?;

        tracing::info!(
            "Added knowledge: {} (title={:?}, chunks={})",
            id,
            item.title,
            chunk_count
        );

        Ok(AddedItem {
            id,
            title: item.title,
            tags,
            chunk_count,
        })
    }

    /// 청킹 → 임베딩 → upsert
    async fn store_chunks(
        &self,
        item_id: &str,
        content: &str,
        title: &str,
        tags: &[String],
        source: &str,
    ) -> Result<usize> {
        let chunks = self.chunker.chunk(content);
        if chunks.is_empty() {
            return Err(KbError::invalid("content must not be empty"));
        }

        let embeddings = self.embedder.embed_batch(&chunks).await.upstream("embed")?;
        if embeddings.len() != chunks.len() {
            return Err(KbError::upstream(
                "embed",
                anyhow::anyhow!(
                    "expected {} embeddings, got {}",
                    chunks.len(),
                    embeddings.len()
                ),
            ));
        }

        let total = chunks.len() as i32;
        let created_at = Utc::now();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| IndexEntry {
                record: ChunkRecord {
                    id: chunk_id(item_id, i),
                    item_id: item_id.to_string(),
                    chunk_index: i as i32,
                    total_chunks: total,
                    text,
                    title: title.to_string(),
                    tags: tags.to_vec(),
                    source: source.to_string(),
                    created_at,
                },
                embedding,
            })
            .collect();

        self.index.upsert(&entries).await.upstream("index.upsert")?;
        Ok(entries.len())
    }

    /// 시맨틱 검색
    ///
    /// 지식베이스가 비어 있으면 임베딩 호출 없이 `empty = true` 응답을 돌려줍니다.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        tag_filter: Option<&str>,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(KbError::invalid("query must not be empty"));
        }
        if top_k == 0 {
            return Err(KbError::invalid("top_k must be > 0"));
        }
        let filter = tag_filter.map(MetadataFilter::tag).transpose()?;

        let collection_size = self.index.count().await.upstream("index.count")?;
        if collection_size == 0 {
            tracing::info!("Search on empty knowledge base: {:?}", query);
            return Ok(SearchResponse {
                query: query.to_string(),
                total_results: 0,
                results: vec![],
                empty: true,
            });
        }

        let k = top_k.min(self.max_top_k).min(collection_size);
        let query_vector = self.embedder.embed(query).await.upstream("embed")?;
        let neighbors = self
            .index
            .nearest(&query_vector, k, filter.as_ref())
            .await
            .upstream("index.nearest")?;

        let results: Vec<SearchResult> = neighbors
            .into_iter()
            .map(|n| SearchResult {
                relevance: distance_to_relevance(n.distance),
                chunk_id: n.record.id,
                item_id: n.record.item_id,
                chunk_index: n.record.chunk_index,
                text: n.record.text,
                title: n.record.title,
                tags: n.record.tags,
                source: n.record.source,
            })
            .collect();

        tracing::info!("Search returned {} results (k={})", results.len(), k);

        Ok(SearchResponse {
            query: query.to_string(),
            total_results: results.len(),
            results,
            empty: false,
        })
    }

    /// 항목 목록 (`limit`은 청크 행 수 상한)
    pub async fn list(&self, tag_filter: Option<&str>, limit: usize) -> Result<ItemList> {
        let filter = tag_filter.map(MetadataFilter::tag).transpose()?;
        let total_chunks = self.index.count().await.upstream("index.count")?;

        let rows = if total_chunks == 0 {
            vec![]
        } else {
            self.index
                .get(filter.as_ref(), limit)
                .await
                .upstream("index.get")?
        };

        let mut seen = HashSet::new();
        let items: Vec<ItemSummary> = rows
            .into_iter()
            .filter(|r| seen.insert(r.item_id.clone()))
            .map(|r| ItemSummary {
                preview: preview(&r.text),
                id: r.item_id,
                title: r.title,
                tags: r.tags,
                source: r.source,
                total_chunks: r.total_chunks,
            })
            .collect();

        Ok(ItemList {
            total_items: items.len(),
            total_chunks,
            items,
        })
    }

    /// 항목 조회 (없으면 None)
    pub async fn get(&self, item_id: &str) -> Result<Option<KnowledgeItem>> {
        let mut chunks = self.item_chunks(item_id).await?;
        if chunks.is_empty() {
            return Ok(None);
        }
        chunks.sort_by_key(|c| c.chunk_index);

        let first = &chunks[0];
        Ok(Some(KnowledgeItem {
            id: first.item_id.clone(),
            title: first.title.clone(),
            tags: first.tags.clone(),
            source: first.source.clone(),
            created_at: first.created_at,
            chunks,
        }))
    }

    /// 항목 삭제 (없으면 NotFound - 에러 아님)
    pub async fn delete(&self, item_id: &str) -> Result<DeleteOutcome> {
        let chunks = self.item_chunks(item_id).await?;
        if chunks.is_empty() {
            tracing::info!("Delete: knowledge {} not found", item_id);
            return Ok(DeleteOutcome::NotFound);
        }

        let ids: Vec<String> = chunks.into_iter().map(|c| c.id).collect();
        let deleted = self.index.delete(&ids).await.upstream("index.delete")?;

        tracing::info!("Deleted knowledge {} ({} chunks)", item_id, deleted);
        Ok(DeleteOutcome::Deleted { chunks: deleted })
    }

    /// 메타데이터만 수정 (재임베딩 없음)
    pub async fn update_metadata(
        &self,
        item_id: &str,
        mut update: MetadataUpdate,
    ) -> Result<UpdateOutcome> {
        validate_item_id(item_id)?;
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(KbError::invalid("title must not be empty"));
            }
        }
        if let Some(tags) = update.tags.take() {
            update.tags = Some(normalize_tags(&tags));
        }

        let chunks = self
            .index
            .update_metadata(item_id, &update)
            .await
            .upstream("index.update")?;

        if chunks == 0 {
            return Ok(UpdateOutcome::NotFound);
        }
        tracing::info!("Updated metadata of {} ({} chunks)", item_id, chunks);
        Ok(UpdateOutcome::Updated { chunks })
    }

    /// 내용 교체 (모든 청크 재생성 + 재임베딩, ID와 메타데이터 유지)
    pub async fn update_content(&self, item_id: &str, content: &str) -> Result<UpdateOutcome> {
        let Some(existing) = self.get(item_id).await? else {
            return Ok(UpdateOutcome::NotFound);
        };

        // 새 청크를 먼저 upsert하여 항목이 사라지는 구간을 두지 않음
        let chunk_count = self
            .store_chunks(
                item_id,
                content,
                &existing.title,
                &existing.tags,
                &existing.source,
            )
            .await?;

        let stale: Vec<String> = existing
            .chunks
            .into_iter()
            .filter(|c| c.chunk_index as usize >= chunk_count)
            .map(|c| c.id)
            .collect();
        if !stale.is_empty() {
            self.index.delete(&stale).await.upstream("index.delete")?;
        }

        tracing::info!(
            "Replaced content of {} ({} chunks, {} stale removed)",
            item_id,
            chunk_count,
            stale.len()
        );
        Ok(UpdateOutcome::Updated {
            chunks: chunk_count,
        })
    }

    /// 전체 통계 (모든 메타데이터 스캔)
    pub async fn stats(&self) -> Result<KnowledgeStats> {
        let total_chunks = self.index.count().await.upstream("index.count")?;
        if total_chunks == 0 {
            return Ok(KnowledgeStats::default());
        }

        let rows = self
            .index
            .get(None, total_chunks)
            .await
            .upstream("index.get")?;

        let mut items = HashSet::new();
        let mut tags: BTreeMap<String, usize> = BTreeMap::new();
        let mut sources: BTreeMap<String, usize> = BTreeMap::new();

        for row in &rows {
            items.insert(row.item_id.as_str());
            for tag in &row.tags {
                *tags.entry(tag.clone()).or_default() += 1;
            }
            if !row.source.is_empty() {
                *sources.entry(row.source.clone()).or_default() += 1;
            }
        }

        Ok(KnowledgeStats {
            total_items: items.len(),
            total_chunks,
            tags,
            sources,
        })
    }

    /// 항목의 모든 청크 (저장 순서)
    async fn item_chunks(&self, item_id: &str) -> Result<Vec<ChunkRecord>> {
        validate_item_id(item_id)?;
        let total = self.index.count().await.upstream("index.count")?;
        if total == 0 {
            return Ok(vec![]);
        }
        self.index
            .get(Some(&MetadataFilter::ItemId(item_id.to_string())), total)
            .await
            .upstream("index.get")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 새 항목 ID (`kb_` + 8자리 hex)
fn new_item_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("kb_{}", &uuid[..8])
}

fn chunk_id(item_id: &str, index: usize) -> String {
    format!("{}_chunk{}", item_id, index)
}

fn validate_item_id(item_id: &str) -> Result<()> {
    if item_id.trim().is_empty() {
        return Err(KbError::invalid("knowledge id must not be empty"));
    }
    Ok(())
}

/// 태그 정규화 (공백 제거, 쉼표 분리, 중복 제거)
fn normalize_tags(tags: &[String]) -> Vec<String> {
    parse_tags(&tags.join(","))
}

/// 코사인 거리 → 관련도 (0.0 ~ 1.0, 소수점 4자리)
pub fn distance_to_relevance(distance: f32) -> f32 {
    let relevance = (1.0 - distance).clamp(0.0, 1.0);
    (relevance * 10_000.0).round() / 10_000.0
}

/// 앞 100자 미리보기 (잘렸으면 `...`)
fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{counts, FakeEmbedder, TEST_DIMENSION};
    use tempfile::TempDir;

    const CHUNKING: ChunkingConfig = ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 20,
    };

    async fn open_kb(dir: &TempDir, embedder: Arc<FakeEmbedder>) -> KnowledgeBase {
        let index = LanceIndex::open(&dir.path().join("kb.lance"), TEST_DIMENSION)
            .await
            .unwrap();
        KnowledgeBase::new(
            Arc::new(index),
            embedder,
            &CHUNKING,
            &RetrievalConfig { max_top_k: 5 },
        )
        .unwrap()
    }

    fn item(content: &str, title: &str, tags: &[&str], source: &str) -> NewItem {
        NewItem {
            content: content.to_string(),
            title: title.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_distance_to_relevance() {
        assert_eq!(distance_to_relevance(0.0), 1.0);
        assert_eq!(distance_to_relevance(0.25), 0.75);
        assert_eq!(distance_to_relevance(1.7), 0.0);
        assert_eq!(distance_to_relevance(-0.1), 1.0);
        assert_eq!(distance_to_relevance(0.123456), 0.8765);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("short"), "short");
        let long = "가".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 103);
    }

    #[test]
    fn test_item_id_format() {
        let id = new_item_id();
        assert!(id.starts_with("kb_"));
        assert_eq!(id.len(), 11);
        assert_ne!(id, new_item_id());
        assert_eq!(chunk_id(&id, 3), format!("{}_chunk3", id));
    }

    #[tokio::test]
    async fn test_empty_search_returns_marker() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let kb = open_kb(&dir, embedder.clone()).await;

        let response = kb.search("anything", 5, None).await.unwrap();
        assert!(response.empty);
        assert_eq!(response.total_results, 0);
        assert!(response.results.is_empty());
        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_add_then_search_verbatim() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(
            FakeEmbedder::new()
                .with("decorator", [1.0, 0.0, 0.0, 0.0])
                .with("ownership", [0.0, 1.0, 0.0, 0.0]),
        );
        let kb = open_kb(&dir, embedder).await;

        let added = kb
            .add(item(
                "A Python decorator wraps a function.",
                "Decorators",
                &["python", " tips ", "python"],
                "note",
            ))
            .await
            .unwrap();
        assert!(added.id.starts_with("kb_"));
        assert_eq!(added.chunk_count, 1);
        assert_eq!(added.tags, vec!["python", "tips"]);

        kb.add(item("Rust ownership rules.", "Ownership", &["rust"], "book"))
            .await
            .unwrap();

        let response = kb
            .search("A Python decorator wraps a function.", 5, None)
            .await
            .unwrap();
        assert!(!response.empty);
        assert_eq!(response.total_results, 2);

        let top = &response.results[0];
        assert_eq!(top.item_id, added.id);
        assert_eq!(top.relevance, 1.0);
        assert_eq!(top.title, "Decorators");
        for r in &response.results {
            assert!((0.0..=1.0).contains(&r.relevance));
        }
        assert_eq!(response.results[1].relevance, 0.0);
    }

    #[tokio::test]
    async fn test_top_k_capped() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        kb.add(item("only one", "One", &[], "note")).await.unwrap();
        let response = kb.search("query", 3, None).await.unwrap();
        assert_eq!(response.total_results, 1);

        for i in 0..6 {
            kb.add(item(&format!("note number {}", i), "N", &[], "note"))
                .await
                .unwrap();
        }
        let response = kb.search("query", 10, None).await.unwrap();
        assert_eq!(response.total_results, 5);
    }

    #[tokio::test]
    async fn test_invalid_search_arguments() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        assert!(matches!(
            kb.search("  ", 5, None).await,
            Err(KbError::InvalidArgument(_))
        ));
        assert!(matches!(
            kb.search("q", 0, None).await,
            Err(KbError::InvalidArgument(_))
        ));
        assert!(matches!(
            kb.search("q", 5, Some("a,b")).await,
            Err(KbError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_tag_filter_exact() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        let ai = kb.add(item("about ai", "AI", &["AI"], "note")).await.unwrap();
        kb.add(item("about failures", "Fail", &["FAIL"], "note"))
            .await
            .unwrap();

        let response = kb.search("about", 5, Some("AI")).await.unwrap();
        assert_eq!(response.total_results, 1);
        assert_eq!(response.results[0].item_id, ai.id);

        let listed = kb.list(Some("AI"), 100).await.unwrap();
        assert_eq!(listed.total_items, 1);
        assert_eq!(listed.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_add_is_all_or_nothing_on_embed_failure() {
        let dir = TempDir::new().unwrap();
        let failing = open_kb(&dir, Arc::new(FakeEmbedder::failing())).await;

        let err = failing
            .add(item("content", "T", &[], "note"))
            .await
            .unwrap_err();
        assert!(matches!(err, KbError::Upstream { op: "embed", .. }));
        assert!(err.is_retryable());

        let stats = failing.stats().await.unwrap();
        assert_eq!(stats.total_chunks, 0);
    }

    #[tokio::test]
    async fn test_add_empty_content_rejected() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let kb = open_kb(&dir, embedder.clone()).await;

        let err = kb.add(item("   \n ", "T", &[], "note")).await.unwrap_err();
        assert!(matches!(err, KbError::InvalidArgument(_)));
        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_all_chunks() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        let long = "Sentence about retrieval pipelines. ".repeat(20);
        let target = kb.add(item(&long, "Long", &[], "note")).await.unwrap();
        assert!(target.chunk_count > 1);
        let other = kb.add(item("keep me", "Keep", &[], "note")).await.unwrap();

        let outcome = kb.delete(&target.id).await.unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome::Deleted {
                chunks: target.chunk_count
            }
        );

        let response = kb.search("retrieval pipelines", 5, None).await.unwrap();
        assert!(response.results.iter().all(|r| r.item_id != target.id));
        assert_eq!(response.results[0].item_id, other.id);

        assert_eq!(kb.delete(&target.id).await.unwrap(), DeleteOutcome::NotFound);
        assert!(kb.get(&target.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_groups_chunks_by_item() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        let long = "Chunked content keeps flowing here. ".repeat(20);
        let multi = kb.add(item(&long, "Multi", &["x"], "note")).await.unwrap();
        kb.add(item("tiny", "Single", &[], "blog")).await.unwrap();

        let listed = kb.list(None, 1000).await.unwrap();
        assert_eq!(listed.total_items, 2);
        assert_eq!(listed.total_chunks, multi.chunk_count + 1);

        let entry = listed.items.iter().find(|i| i.id == multi.id).unwrap();
        assert_eq!(entry.title, "Multi");
        assert_eq!(entry.total_chunks as usize, multi.chunk_count);
        assert!(entry.preview.ends_with("..."));
        assert_eq!(entry.preview.chars().count(), 103);

        // limit은 청크 행 기준
        let capped = kb.list(None, 1).await.unwrap();
        assert_eq!(capped.total_items, 1);
    }

    #[tokio::test]
    async fn test_get_returns_chunks_in_order() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        let long = "Ordered chunk text goes on and on. ".repeat(20);
        let added = kb.add(item(&long, "Ordered", &["a", "b"], "note")).await.unwrap();

        let fetched = kb.get(&added.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Ordered");
        assert_eq!(fetched.tags, vec!["a", "b"]);
        assert_eq!(fetched.chunks.len(), added.chunk_count);
        for (i, chunk) in fetched.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index as usize, i);
            assert_eq!(chunk.total_chunks as usize, added.chunk_count);
            assert!(chunk.text.chars().count() <= CHUNKING.chunk_size);
        }
    }

    #[tokio::test]
    async fn test_stats_histograms() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        assert_eq!(kb.stats().await.unwrap().total_items, 0);

        kb.add(item("first", "A", &["rust", "ai"], "note")).await.unwrap();
        kb.add(item("second", "B", &["ai"], "blog")).await.unwrap();

        let stats = kb.stats().await.unwrap();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(
            stats.tags.into_iter().collect::<std::collections::HashMap<_, _>>(),
            counts(&[("rust", 1), ("ai", 2)])
        );
        assert_eq!(
            stats.sources.into_iter().collect::<std::collections::HashMap<_, _>>(),
            counts(&[("note", 1), ("blog", 1)])
        );
    }

    #[tokio::test]
    async fn test_update_metadata_without_reembedding() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(FakeEmbedder::new());
        let kb = open_kb(&dir, embedder.clone()).await;

        let added = kb.add(item("body", "Old", &["old"], "note")).await.unwrap();
        let calls_after_add = embedder.call_count();

        let outcome = kb
            .update_metadata(
                &added.id,
                MetadataUpdate {
                    title: Some("New".to_string()),
                    tags: Some(vec!["new, fresh".to_string()]),
                    source: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated { chunks: 1 });
        assert_eq!(embedder.call_count(), calls_after_add);

        let fetched = kb.get(&added.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "New");
        assert_eq!(fetched.tags, vec!["new", "fresh"]);
        assert_eq!(fetched.source, "note");

        let missing = kb
            .update_metadata("kb_missing", MetadataUpdate::default())
            .await
            .unwrap();
        assert_eq!(missing, UpdateOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_update_content_rechunks() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, Arc::new(FakeEmbedder::new())).await;

        let long = "Original long content sentence. ".repeat(20);
        let added = kb.add(item(&long, "Doc", &["t"], "note")).await.unwrap();
        assert!(added.chunk_count > 1);

        let outcome = kb.update_content(&added.id, "Short replacement.").await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated { chunks: 1 });

        let fetched = kb.get(&added.id).await.unwrap().unwrap();
        assert_eq!(fetched.chunks.len(), 1);
        assert_eq!(fetched.chunks[0].text, "Short replacement.");
        assert_eq!(fetched.chunks[0].total_chunks, 1);
        assert_eq!(fetched.title, "Doc");

        assert_eq!(
            kb.update_content("kb_missing", "x").await.unwrap(),
            UpdateOutcome::NotFound
        );
    }
}

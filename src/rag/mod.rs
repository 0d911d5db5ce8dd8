//! RAG 모듈 - 검색 결과를 근거로 답변 생성
//!
//! 1. 지식베이스 검색
//! 2. 관련도 임계값 필터 (전부 걸러지면 상위 N개로 대체)
//! 3. 컨텍스트 블록 구성 → 시스템 프롬프트
//! 4. 생성 서비스 호출, 출처 목록과 함께 반환

use std::sync::Arc;

use serde::Serialize;

use crate::config::RagConfig;
use crate::error::{KbError, Result, UpstreamExt};
use crate::knowledge::{KnowledgeBase, SearchResult};
use crate::llm::{GenerationService, Usage};

/// 검색 결과가 없을 때의 고정 답변
pub const NO_KNOWLEDGE_ANSWER: &str =
    "The knowledge base has nothing relevant to this question yet. Add related material first.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

// ============================================================================
// Types
// ============================================================================

/// 답변 출처 (항목 단위)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub item_id: String,
    pub title: String,
    /// 항목의 청크 중 가장 높은 관련도
    pub relevance: f32,
}

/// RAG 답변
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub context_chunks_used: usize,
    /// 생성을 건너뛰었으면 None
    pub provider: Option<String>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

// ============================================================================
// RagService
// ============================================================================

/// RAG 오케스트레이터
pub struct RagService {
    kb: Arc<KnowledgeBase>,
    llm: Arc<dyn GenerationService>,
    config: RagConfig,
}

impl RagService {
    pub fn new(kb: Arc<KnowledgeBase>, llm: Arc<dyn GenerationService>, config: RagConfig) -> Self {
        Self { kb, llm, config }
    }

    /// 질문에 대한 근거 기반 답변
    pub async fn ask(
        &self,
        question: &str,
        top_k: usize,
        provider: Option<&str>,
    ) -> Result<RagAnswer> {
        if question.trim().is_empty() {
            return Err(KbError::invalid("question must not be empty"));
        }

        let response = self.kb.search(question, top_k, None).await?;
        if response.results.is_empty() {
            tracing::info!("No knowledge found for question, skipping generation");
            return Ok(RagAnswer {
                question: question.to_string(),
                answer: NO_KNOWLEDGE_ANSWER.to_string(),
                sources: vec![],
                context_chunks_used: 0,
                provider: None,
                model: None,
                usage: None,
            });
        }

        let selected = select_context(
            &response.results,
            self.config.min_relevance,
            self.config.fallback_results,
        );
        let system_prompt = build_system_prompt(&build_context(&selected));

        tracing::info!(
            "Answering with {} of {} retrieved chunks",
            selected.len(),
            response.results.len()
        );

        let completion = self
            .llm
            .complete(question, Some(&system_prompt), provider)
            .await
            .upstream("generate")?;

        Ok(RagAnswer {
            question: question.to_string(),
            answer: completion.reply,
            sources: collect_sources(&selected),
            context_chunks_used: selected.len(),
            provider: Some(completion.provider),
            model: Some(completion.model),
            usage: Some(completion.usage),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 임계값 이상인 결과 (없으면 상위 `fallback` 개)
fn select_context(
    results: &[SearchResult],
    min_relevance: f32,
    fallback: usize,
) -> Vec<&SearchResult> {
    let relevant: Vec<&SearchResult> = results
        .iter()
        .filter(|r| r.relevance >= min_relevance)
        .collect();

    if relevant.is_empty() {
        tracing::debug!(
            "No result above relevance {:.2}, using top {}",
            min_relevance,
            fallback
        );
        return results.iter().take(fallback.max(1)).collect();
    }
    relevant
}

/// `[n] Source: <title> (relevance: 0.00)` 블록들을 구분자로 연결
fn build_context(results: &[&SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[{}] Source: {} (relevance: {:.2})\n{}",
                i + 1,
                r.title,
                r.relevance,
                r.text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn build_system_prompt(context: &str) -> String {
    format!(
        "You are a knowledge base assistant. Answer the user's question using the reference \
material below, which is sorted by relevance.\n\n\
Rules:\n\
1. Answer only from the reference material.\n\
2. If the material is not enough to answer, say so explicitly.\n\
3. Do not make up facts that are not in the material.\n\
4. Cite the sources you used by their [n] number and title.\n\n\
Reference material:\n\n{}",
        context
    )
}

/// 항목별로 중복 제거 (최고 관련도 유지, 처음 등장 순서)
fn collect_sources(results: &[&SearchResult]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for r in results {
        match sources.iter_mut().find(|s| s.item_id == r.item_id) {
            Some(existing) => existing.relevance = existing.relevance.max(r.relevance),
            None => sources.push(SourceRef {
                item_id: r.item_id.clone(),
                title: r.title.clone(),
                relevance: r.relevance,
            }),
        }
    }
    sources
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, RetrievalConfig};
    use crate::knowledge::{LanceIndex, NewItem};
    use crate::testing::{FakeEmbedder, ScriptedGenerator, TEST_DIMENSION};
    use tempfile::TempDir;

    fn result(item: &str, relevance: f32, text: &str) -> SearchResult {
        SearchResult {
            chunk_id: format!("{}_chunk0", item),
            item_id: item.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            relevance,
            title: format!("Title {}", item),
            tags: vec![],
            source: "note".to_string(),
        }
    }

    async fn open_kb(dir: &TempDir, embedder: FakeEmbedder) -> Arc<KnowledgeBase> {
        let index = LanceIndex::open(&dir.path().join("kb.lance"), TEST_DIMENSION)
            .await
            .unwrap();
        Arc::new(
            KnowledgeBase::new(
                Arc::new(index),
                Arc::new(embedder),
                &ChunkingConfig {
                    chunk_size: 200,
                    chunk_overlap: 20,
                },
                &RetrievalConfig { max_top_k: 5 },
            )
            .unwrap(),
        )
    }

    async fn add(kb: &KnowledgeBase, content: &str, title: &str) -> String {
        kb.add(NewItem {
            content: content.to_string(),
            title: title.to_string(),
            tags: vec![],
            source: "note".to_string(),
        })
        .await
        .unwrap()
        .id
    }

    #[test]
    fn test_select_context_threshold() {
        let results = vec![result("a", 0.9, "x"), result("b", 0.3, "y")];
        let selected = select_context(&results, 0.6, 2);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].item_id, "a");
    }

    #[test]
    fn test_select_context_fallback() {
        let results = vec![
            result("a", 0.5, "x"),
            result("b", 0.4, "y"),
            result("c", 0.1, "z"),
        ];
        let selected = select_context(&results, 0.6, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].item_id, "a");
        assert_eq!(selected[1].item_id, "b");
    }

    #[test]
    fn test_build_context_format() {
        let a = result("a", 0.876, "first text");
        let b = result("b", 0.5, "second text");
        let context = build_context(&[&a, &b]);
        assert_eq!(
            context,
            "[1] Source: Title a (relevance: 0.88)\nfirst text\n\n---\n\n\
[2] Source: Title b (relevance: 0.50)\nsecond text"
        );
    }

    #[test]
    fn test_sources_dedup_keeps_best() {
        let mut low = result("a", 0.7, "x");
        low.chunk_id = "a_chunk1".to_string();
        let high = result("a", 0.9, "y");
        let other = result("b", 0.8, "z");
        let sources = collect_sources(&[&low, &other, &high]);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].item_id, "a");
        assert_eq!(sources[0].relevance, 0.9);
        assert_eq!(sources[1].item_id, "b");
    }

    #[tokio::test]
    async fn test_ask_empty_knowledge_base() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, FakeEmbedder::new()).await;
        let llm = Arc::new(ScriptedGenerator::replying("unused"));
        let rag = RagService::new(kb, llm.clone(), RagConfig::default());

        let answer = rag.ask("Q", 5, None).await.unwrap();
        assert_eq!(answer.answer, NO_KNOWLEDGE_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.context_chunks_used, 0);
        assert!(answer.usage.is_none());
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ask_keeps_above_threshold_chunk() {
        let dir = TempDir::new().unwrap();
        let embedder = FakeEmbedder::new()
            .with("Q", [1.0, 0.0, 0.0, 0.0])
            .with("relevant", [1.0, 0.0, 0.0, 0.0])
            .with("unrelated", [0.0, 1.0, 0.0, 0.0]);
        let kb = open_kb(&dir, embedder).await;
        let relevant = add(&kb, "relevant fact", "Good").await;
        add(&kb, "unrelated noise", "Bad").await;

        let llm = Arc::new(ScriptedGenerator::replying("answer [1]"));
        let rag = RagService::new(kb, llm.clone(), RagConfig::default());

        let answer = rag.ask("Q", 5, Some("deepseek")).await.unwrap();
        assert_eq!(answer.answer, "answer [1]");
        assert_eq!(answer.context_chunks_used, 1);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].item_id, relevant);
        assert_eq!(answer.sources[0].relevance, 1.0);
        assert_eq!(answer.provider.as_deref(), Some("deepseek"));
        assert_eq!(answer.usage.unwrap().prompt_tokens, 10);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].user, "Q");
        let system = calls[0].system.as_deref().unwrap();
        assert!(system.contains("[1] Source: Good (relevance: 1.00)\nrelevant fact"));
        assert!(!system.contains("unrelated noise"));
    }

    #[tokio::test]
    async fn test_ask_falls_back_when_all_below_threshold() {
        let dir = TempDir::new().unwrap();
        let embedder = FakeEmbedder::new()
            .with("Q", [1.0, 0.0, 0.0, 0.0])
            .with("first", [0.0, 1.0, 0.0, 0.0])
            .with("second", [0.0, 0.0, 1.0, 0.0])
            .with("third", [0.0, 0.0, 0.0, 1.0]);
        let kb = open_kb(&dir, embedder).await;
        add(&kb, "first note", "One").await;
        add(&kb, "second note", "Two").await;
        add(&kb, "third note", "Three").await;

        let llm = Arc::new(ScriptedGenerator::replying("weak answer"));
        let rag = RagService::new(kb, llm.clone(), RagConfig::default());

        let answer = rag.ask("Q", 5, None).await.unwrap();
        assert_eq!(answer.context_chunks_used, 2);
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(llm.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_ask_wraps_generation_failure() {
        let dir = TempDir::new().unwrap();
        let kb = open_kb(&dir, FakeEmbedder::new()).await;
        add(&kb, "some fact", "Fact").await;

        let rag = RagService::new(
            kb,
            Arc::new(ScriptedGenerator::failing()),
            RagConfig::default(),
        );

        let err = rag.ask("Q", 5, None).await.unwrap_err();
        assert!(matches!(err, KbError::Upstream { op: "generate", .. }));
    }
}

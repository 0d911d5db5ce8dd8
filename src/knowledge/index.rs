//! Vector Index - 영속 벡터 인덱스 트레이트 및 레코드 타입
//!
//! 임베딩 계산은 하지 않습니다. `KnowledgeBase`가 임베딩한 벡터를 받아 저장/검색만 합니다.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::KbError;

// ============================================================================
// Types
// ============================================================================

/// 청크 레코드 (메타데이터 포함, 벡터 제외)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    /// 청크 ID (`<item_id>_chunk<i>`)
    pub id: String,
    /// 소속 지식 항목 ID
    pub item_id: String,
    /// 항목 내 위치 (0-based)
    pub chunk_index: i32,
    /// 생성 시점의 항목 청크 수
    pub total_chunks: i32,
    /// 청크 텍스트
    pub text: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    /// 태그 집합에 `tag`가 포함되는지 (정확 일치)
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// 저장용 엔트리 (레코드 + 임베딩)
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub record: ChunkRecord,
    pub embedding: Vec<f32>,
}

/// 최근접 이웃 검색 결과
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub record: ChunkRecord,
    /// 코사인 거리 (0.0 = 동일)
    pub distance: f32,
}

/// 메타데이터 필터
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    /// 태그 집합에 해당 태그 포함
    Tag(String),
    /// 특정 항목의 청크
    ItemId(String),
}

impl MetadataFilter {
    /// 태그 필터 생성 (검증 포함)
    ///
    /// 태그는 쉼표로 직렬화되므로 쉼표를 포함할 수 없습니다.
    pub fn tag(tag: &str) -> Result<Self, KbError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(KbError::invalid("tag filter must not be empty"));
        }
        if tag.contains(',') {
            return Err(KbError::invalid(format!(
                "tag filter must be a single tag, got {:?}",
                tag
            )));
        }
        Ok(Self::Tag(tag.to_string()))
    }

    /// 레코드가 필터를 만족하는지
    pub fn matches(&self, record: &ChunkRecord) -> bool {
        match self {
            Self::Tag(tag) => record.has_tag(tag),
            Self::ItemId(id) => record.item_id == *id,
        }
    }
}

/// 메타데이터 부분 수정 (None은 유지)
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.tags.is_none() && self.source.is_none()
    }
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 영속 벡터 인덱스 트레이트 (async)
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 엔트리 배치 upsert (한 번의 호출로 원자적 반영)
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize>;

    /// 최근접 이웃 검색 (거리 오름차순)
    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Neighbor>>;

    /// 필터에 맞는 레코드 조회 (저장 순서, 최대 `limit` 행)
    async fn get(&self, filter: Option<&MetadataFilter>, limit: usize) -> Result<Vec<ChunkRecord>>;

    /// ID 목록으로 삭제, 삭제된 행 수 반환
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 항목의 모든 청크 메타데이터 수정, 수정된 행 수 반환
    async fn update_metadata(&self, item_id: &str, update: &MetadataUpdate) -> Result<usize>;

    /// 전체 행 수
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Tag Helpers
// ============================================================================

/// 쉼표 구분 문자열을 태그 목록으로 (공백 제거, 빈 항목/중복 무시, 순서 유지)
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// 태그 목록 직렬화 (`a,b`)
pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

/// 집합 포함 검사용 태그 키 (`,a,b,`)
///
/// `,tag,` 부분 문자열 검사가 정확한 원소 일치와 같아집니다.
pub fn tag_key(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(",{},", tags.join(","))
    }
}

// ============================================================================
// Tests
// ============================================================================

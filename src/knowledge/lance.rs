//! LanceDB Vector Index - 청크 레코드 영속 저장 + 코사인 ANN 검색
//!
//! 테이블은 `open()` 시점에 생성해 두므로 첫 삽입이 동시에 일어나도 테이블을
//! 두 번 만들지 않습니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::index::{
    join_tags, parse_tags, tag_key, ChunkRecord, IndexEntry, MetadataFilter, MetadataUpdate,
    Neighbor, VectorIndex,
};

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
pub struct LanceIndex {
    db: Connection,
    schema: SchemaRef,
    dimension: usize,
}

impl LanceIndex {
    /// LanceDB 인덱스 열기 (테이블이 없으면 생성)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Embedding dimension must be > 0");
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let schema = Arc::new(Self::create_schema(dimension)?);

        let names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        if !names.iter().any(|n| n == TABLE_NAME) {
            db.create_empty_table(TABLE_NAME, schema.clone())
                .execute()
                .await
                .context("Failed to create chunk table")?;
            tracing::info!("Created LanceDB table '{}' (dimension={})", TABLE_NAME, dimension);
        }

        Ok(Self {
            db,
            schema,
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 청크 테이블 스키마
    fn create_schema(dimension: usize) -> Result<Schema> {
        let dim = i32::try_from(dimension).context("Embedding dimension too large")?;
        Ok(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("item_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("total_chunks", DataType::Int32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("tags", DataType::Utf8, false),
            Field::new("tag_key", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dim,
                ),
                false,
            ),
        ]))
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(&self, entries: &[IndexEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch for {}: expected {}, got {}",
                bad.record.id,
                self.dimension,
                bad.embedding.len()
            );
        }

        let records: Vec<&ChunkRecord> = entries.iter().map(|e| &e.record).collect();
        let tags: Vec<String> = records.iter().map(|r| join_tags(&r.tags)).collect();
        let tag_keys: Vec<String> = records.iter().map(|r| tag_key(&r.tags)).collect();
        let created: Vec<String> = records.iter().map(|r| r.created_at.to_rfc3339()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()))),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.item_id.as_str()),
                )),
                Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.chunk_index))),
                Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.total_chunks))),
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.text.as_str()))),
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.title.as_str()))),
                Arc::new(StringArray::from_iter_values(tags.iter().map(String::as_str))),
                Arc::new(StringArray::from_iter_values(tag_keys.iter().map(String::as_str))),
                Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.source.as_str()))),
                Arc::new(StringArray::from_iter_values(created.iter().map(String::as_str))),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    async fn table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open chunk table")
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();
        let table = self.table().await?;

        let mut merge = table.merge_insert(&["id"]);
        merge.when_matched_update_all(None).when_not_matched_insert_all();
        merge
            .execute(Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema)))
            .await
            .context("Failed to upsert chunks")?;

        Ok(entries.len())
    }

    async fn nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let table = self.table().await?;

        let mut search = table
            .vector_search(query.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(k);
        if let Some(f) = filter {
            search = search.only_if(filter_expr(f));
        }

        let batches: Vec<RecordBatch> = search
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await
            .context("Failed to read search results")?;

        let mut neighbors = Vec::new();
        for batch in &batches {
            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for (i, record) in batch_to_records(batch)?.into_iter().enumerate() {
                neighbors.push(Neighbor {
                    record,
                    distance: distances.value(i),
                });
            }
        }

        // LIKE 결과를 정확한 집합 포함으로 재확인
        if let Some(f) = filter {
            neighbors.retain(|n| f.matches(&n.record));
        }

        Ok(neighbors)
    }

    async fn get(&self, filter: Option<&MetadataFilter>, limit: usize) -> Result<Vec<ChunkRecord>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let table = self.table().await?;

        let mut query = table.query().limit(limit);
        if let Some(f) = filter {
            query = query.only_if(filter_expr(f));
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .context("Failed to execute query")?
            .try_collect()
            .await
            .context("Failed to read query results")?;

        let mut records = Vec::new();
        for batch in &batches {
            records.extend(batch_to_records(batch)?);
        }

        if let Some(f) = filter {
            records.retain(|r| f.matches(r));
        }

        Ok(records)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let table = self.table().await?;

        let before_count = table.count_rows(None).await.context("Failed to count rows")?;

        let list = ids
            .iter()
            .map(|id| sql_string(id))
            .collect::<Vec<_>>()
            .join(", ");
        table
            .delete(&format!("id IN ({})", list))
            .await
            .context("Failed to delete chunks")?;

        let after_count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn update_metadata(&self, item_id: &str, update: &MetadataUpdate) -> Result<usize> {
        let table = self.table().await?;
        let filter = filter_expr(&MetadataFilter::ItemId(item_id.to_string()));

        let matched = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count item rows")?;
        if matched == 0 || update.is_empty() {
            return Ok(matched);
        }

        let mut builder = table.update().only_if(filter);
        if let Some(title) = &update.title {
            builder = builder.column("title", sql_string(title));
        }
        if let Some(tags) = &update.tags {
            builder = builder
                .column("tags", sql_string(&join_tags(tags)))
                .column("tag_key", sql_string(&tag_key(tags)));
        }
        if let Some(source) = &update.source {
            builder = builder.column("source", sql_string(source));
        }
        builder
            .execute()
            .await
            .context("Failed to update chunk metadata")?;

        Ok(matched)
    }

    async fn count(&self) -> Result<usize> {
        let table = self.table().await?;
        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// LIKE 패턴 와일드카드 이스케이프
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 메타데이터 필터를 LanceDB SQL 조건식으로 변환
fn filter_expr(filter: &MetadataFilter) -> String {
    match filter {
        MetadataFilter::Tag(tag) => {
            let pattern = format!("%,{},%", escape_like(tag));
            format!("tag_key LIKE {}", sql_string(&pattern))
        }
        MetadataFilter::ItemId(id) => format!("item_id = {}", sql_string(id)),
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

/// RecordBatch를 청크 레코드 목록으로 변환
fn batch_to_records(batch: &RecordBatch) -> Result<Vec<ChunkRecord>> {
    let ids = string_column(batch, "id")?;
    let item_ids = string_column(batch, "item_id")?;
    let chunk_indices = int_column(batch, "chunk_index")?;
    let totals = int_column(batch, "total_chunks")?;
    let texts = string_column(batch, "text")?;
    let titles = string_column(batch, "title")?;
    let tags = string_column(batch, "tags")?;
    let sources = string_column(batch, "source")?;
    let created = string_column(batch, "created_at")?;

    let records = (0..batch.num_rows())
        .map(|i| ChunkRecord {
            id: ids.value(i).to_string(),
            item_id: item_ids.value(i).to_string(),
            chunk_index: chunk_indices.value(i),
            total_chunks: totals.value(i),
            text: texts.value(i).to_string(),
            title: titles.value(i).to_string(),
            tags: parse_tags(tags.value(i)),
            source: sources.value(i).to_string(),
            created_at: parse_datetime(created.value(i)),
        })
        .collect();

    Ok(records)
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

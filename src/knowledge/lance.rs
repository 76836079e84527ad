//! LanceDB Passage Index - 패시지 벡터 검색
//!
//! 쿼리를 임베딩한 뒤 LanceDB ANN 검색으로 가까운 패시지를 찾습니다.
//! 테이블은 수집 파이프라인이 채우며, 이 모듈은 그 스키마를 정의합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::embedding::EmbeddingProvider;

use super::passage::{Passage, PassageIndex};

/// 패시지 테이블 이름
const TABLE_NAME: &str = "passages";

// ============================================================================
// LancePassageIndex
// ============================================================================

/// LanceDB 기반 패시지 인덱스
pub struct LancePassageIndex {
    db: Connection,
    embedder: Box<dyn EmbeddingProvider>,
}

impl LancePassageIndex {
    /// 기존 인덱스 열기
    ///
    /// 디렉토리가 없으면 실패합니다. 인덱스 생성은 수집 파이프라인의 몫입니다.
    pub async fn open(path: &Path, embedder: Box<dyn EmbeddingProvider>) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Index not found at {}", path.display());
        }
        Self::connect(path, embedder).await
    }

    /// 인덱스 열기 (없으면 빈 디렉토리 생성)
    pub async fn open_or_create(path: &Path, embedder: Box<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create index directory")?;
            }
        }
        Self::connect(path, embedder).await
    }

    async fn connect(path: &Path, embedder: Box<dyn EmbeddingProvider>) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        tracing::debug!("Opened passage index at {:?}", path);
        Ok(Self { db, embedder })
    }

    /// 패시지 테이블 스키마
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("embedding_ref", DataType::Utf8, false),
            Field::new("source_id", DataType::Utf8, false),
            Field::new("position", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    fn dimension(&self) -> Result<i32> {
        i32::try_from(self.embedder.dimension()).context("Embedding dimension too large")
    }

    /// 패시지들을 Arrow RecordBatch로 변환
    fn passages_to_batch(
        passages: &[Passage],
        embeddings: &[Vec<f32>],
        dimension: i32,
    ) -> Result<RecordBatch> {
        if passages.is_empty() {
            anyhow::bail!("Cannot create batch from empty passages");
        }
        if passages.len() != embeddings.len() {
            anyhow::bail!(
                "Passage/embedding count mismatch: {} vs {}",
                passages.len(),
                embeddings.len()
            );
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension as usize) {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            );
        }

        let refs: Vec<&str> = passages.iter().map(|p| p.embedding_ref.as_str()).collect();
        let sources: Vec<&str> = passages.iter().map(|p| p.source_id.as_str()).collect();
        let positions: Vec<u32> = passages.iter().map(|p| p.position).collect();
        let contents: Vec<&str> = passages.iter().map(|p| p.content.as_str()).collect();

        let values = Float32Array::from(embeddings.concat());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embedding_list =
            FixedSizeListArray::try_new(field, dimension, Arc::new(values) as Arc<dyn Array>, None)
                .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(refs)),
                Arc::new(StringArray::from(sources)),
                Arc::new(UInt32Array::from(positions)),
                Arc::new(StringArray::from(contents)),
                Arc::new(embedding_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open passage table")
    }

    /// 패시지 배치 삽입 (수집 파이프라인 쓰기 계약)
    ///
    /// 패시지 본문을 임베딩하여 함께 저장합니다.
    pub async fn insert_batch(&self, passages: &[Passage]) -> Result<usize> {
        if passages.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = passages.iter().map(|p| p.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed passages")?;

        let batch = Self::passages_to_batch(passages, &embeddings, self.dimension()?)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            self.open_table()
                .await?
                .add(batches)
                .execute()
                .await
                .context("Failed to add passages to table")?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create passage table")?;
        }

        tracing::info!("Indexed {} passage(s)", passages.len());
        Ok(passages.len())
    }

    fn batch_to_passages(batch: &RecordBatch, out: &mut Vec<Passage>) -> Result<()> {
        let string_column = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
        };

        let refs = string_column("embedding_ref")?;
        let sources = string_column("source_id")?;
        let contents = string_column("content")?;
        let positions = batch
            .column_by_name("position")
            .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing position column"))?;

        for i in 0..batch.num_rows() {
            out.push(Passage {
                content: contents.value(i).to_string(),
                source_id: sources.value(i).to_string(),
                position: positions.value(i),
                embedding_ref: refs.value(i).to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PassageIndex for LancePassageIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        if k == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let table = self.open_table().await?;

        // 결과는 _distance 오름차순 (가까운 순)
        let batches: Vec<RecordBatch> = table
            .vector_search(query_embedding)
            .context("Failed to create vector search")?
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut passages = Vec::with_capacity(k);
        for batch in &batches {
            Self::batch_to_passages(batch, &mut passages)?;
        }

        tracing::debug!("Similarity search returned {} passage(s) (k={})", passages.len(), k);
        Ok(passages)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        self.open_table()
            .await?
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 8;

    /// 글자 코드 합으로 만드는 결정적 임베딩
    struct HashEmbedding;

    #[async_trait]
    impl EmbeddingProvider for HashEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; DIM];
            for (i, c) in text.to_lowercase().chars().enumerate() {
                v[(c as usize + i) % DIM] += 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "hash"
        }
    }

    fn sample_passages() -> Vec<Passage> {
        vec![
            Passage::new("Logo của trường hình quyển sách màu xanh.", "so-tay.pdf", 1),
            Passage::new("Quy định sử dụng máy móc trong phòng lab.", "quy-dinh.pdf", 4),
            Passage::new("Hướng dẫn đăng ký thư viện cho sinh viên.", "so-tay.pdf", 7),
        ]
    }

    #[tokio::test]
    async fn test_open_missing_index_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.lance");
        assert!(LancePassageIndex::open(&path, Box::new(HashEmbedding)).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.lance");
        let index = LancePassageIndex::open_or_create(&path, Box::new(HashEmbedding))
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.similarity_search("logo", 3).await.unwrap().is_empty());

        let inserted = index.insert_batch(&sample_passages()).await.unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(index.count().await.unwrap(), 3);

        index.insert_batch(&sample_passages()[..1]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_search_round_trips_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.lance");
        let index = LancePassageIndex::open_or_create(&path, Box::new(HashEmbedding))
            .await
            .unwrap();
        index.insert_batch(&sample_passages()).await.unwrap();

        let query = "Logo của trường hình quyển sách màu xanh.";
        let results = index.similarity_search(query, 2).await.unwrap();

        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        // 동일 텍스트는 거리 0
        assert_eq!(results[0].source_id, "so-tay.pdf");
        assert_eq!(results[0].position, 1);
        assert_eq!(results[0].embedding_ref, "so-tay.pdf#1");

        let reopened = LancePassageIndex::open(&path, Box::new(HashEmbedding))
            .await
            .unwrap();
        assert_eq!(reopened.count().await.unwrap(), 3);
    }

    #[test]
    fn test_batch_dimension_mismatch() {
        let passages = sample_passages();
        let embeddings = vec![vec![0.0; 3]; passages.len()];
        assert!(LancePassageIndex::passages_to_batch(&passages, &embeddings, DIM as i32).is_err());
    }
}

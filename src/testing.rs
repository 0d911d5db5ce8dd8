//! 테스트용 가짜 외부 서비스
//!
//! 네트워크 없이 임베딩/생성 동작을 결정적으로 재현합니다.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::llm::{Completion, GenerationService, Usage};

pub const TEST_DIMENSION: usize = 4;

/// 텍스트 → 벡터 매핑 임베더
///
/// 등록된 텍스트가 포함된 입력은 해당 벡터를, 나머지는 기본 벡터를 돌려줍니다.
pub struct FakeEmbedder {
    vectors: Vec<(String, Vec<f32>)>,
    fallback: Vec<f32>,
    fail: bool,
    calls: Mutex<usize>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: Vec::new(),
            fallback: vec![0.0, 0.0, 0.0, 1.0],
            fail: false,
            calls: Mutex::new(0),
        }
    }

    /// 항상 실패하는 임베더
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// `needle`을 포함하는 텍스트를 `vector`로 매핑
    pub fn with(mut self, needle: &str, vector: [f32; TEST_DIMENSION]) -> Self {
        self.vectors.push((needle.to_string(), vector.to_vec()));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            anyhow::bail!("embedding service unavailable");
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    fn name(&self) -> &str {
        "fake-embedder"
    }
}

/// 기록된 생성 호출
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub user: String,
    pub system: Option<String>,
    pub provider: Option<String>,
}

/// 고정 응답 생성기 (호출 기록)
pub struct ScriptedGenerator {
    reply: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn complete(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        provider: Option<&str>,
    ) -> Result<Completion> {
        self.calls.lock().unwrap().push(RecordedCall {
            user: user_message.to_string(),
            system: system_message.map(str::to_string),
            provider: provider.map(str::to_string),
        });

        let reply = self
            .reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation service unavailable"))?;

        Ok(Completion {
            reply,
            provider: provider.unwrap_or("scripted").to_string(),
            model: "scripted-model".to_string(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        })
    }
}

/// 테스트용 HashMap 헬퍼
pub fn counts(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

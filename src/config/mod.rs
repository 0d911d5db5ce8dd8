//! 설정 모듈
//!
//! 모든 튜닝 값(청크 크기, 관련도 임계값, 엔드포인트)을 하나의 값 객체로 모읍니다.
//! 프로세스 시작 시 한 번 로드하여 각 컴포넌트 생성자에 전달합니다.
//!
//! 검색 순서:
//! 1. `$KB_RAG_CONFIG` 환경변수가 가리키는 TOML 파일
//! 2. `<data_dir>/config.toml`
//! 3. 내장 기본값

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KbError, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 (~/.local/share/.kb-rag/ 등)
///
/// `KB_RAG_DATA_DIR` 환경변수로 덮어쓸 수 있습니다.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KB_RAG_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kb-rag")
}

// ============================================================================
// Config
// ============================================================================

/// 루트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 데이터 저장 디렉토리 (LanceDB, 원문 Markdown)
    #[serde(default = "get_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            rag: RagConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// 청킹 설정 (문자 수 기준)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 호출자가 요청한 top_k의 상한
    pub max_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_top_k: 5 }
    }
}

/// RAG 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 컨텍스트에 포함할 최소 관련도 (0.0 ~ 1.0)
    pub min_relevance: f32,
    /// 임계값을 넘는 결과가 없을 때 사용할 상위 결과 수
    pub fallback_results: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            min_relevance: 0.6,
            fallback_results: 2,
        }
    }
}

/// 임베딩 API 설정 (OpenAI 호환 `/embeddings`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.siliconflow.cn/v1".to_string(),
            model: "BAAI/bge-m3".to_string(),
            dimension: 1024,
            timeout_secs: 30,
        }
    }
}

/// 생성 모델 설정 (OpenAI 호환 `/chat/completions`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// 표준 검색 순서로 설정 로드
    ///
    /// 파일이 없으면 기본값을 사용합니다. 파일이 있는데 잘못된 경우는 에러입니다.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("KB_RAG_CONFIG") {
            if !path.is_empty() {
                return Self::load_from_file(Path::new(&path));
            }
        }

        let default_path = get_data_dir().join("config.toml");
        if default_path.exists() {
            return Self::load_from_file(&default_path);
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// 지정된 TOML 파일에서 로드
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KbError::invalid(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&contents)?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// TOML 문자열 파싱 + 검증
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| KbError::invalid(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(KbError::invalid("chunking.chunk_size must be > 0"));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(KbError::invalid(format!(
                "chunking.chunk_overlap ({}) must be in [0, {})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if self.retrieval.max_top_k == 0 {
            return Err(KbError::invalid("retrieval.max_top_k must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.rag.min_relevance) {
            return Err(KbError::invalid(format!(
                "rag.min_relevance ({}) must be in [0, 1]",
                self.rag.min_relevance
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(KbError::invalid("embedding.dimension must be > 0"));
        }
        Ok(())
    }

    /// LanceDB 디렉토리 경로
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.lance")
    }

    /// 원문 Markdown 디렉토리 경로
    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Text Chunking Module
//!
//! 고정 크기 윈도우 + 오버랩 방식으로 텍스트를 분할합니다.
//! 윈도우 후반부의 자연스러운 경계(문단, 줄바꿈, 문장 끝)에서 끊는 것을 우선합니다.
//!
//! 길이는 모두 문자(char) 단위입니다. 바이트 단위로 자르면 한글/한자 텍스트에서
//! UTF-8 경계가 깨집니다.

use crate::config::ChunkingConfig;
use crate::error::{KbError, Result};

/// 우선 분할 지점 (앞쪽일수록 의미상 강한 경계)
const BREAKPOINTS: &[&str] = &[
    "\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", "；", "; ",
];

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TextSplitter
// ============================================================================

/// 오버랩 + 자연 경계 청커
///
/// 생성 시점에 파라미터를 검증하므로 `chunk()`는 실패하지 않습니다.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// 파라미터 검증 후 생성
    ///
    /// `chunk_size > 0`, `chunk_overlap < chunk_size` 이어야 합니다.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(KbError::invalid("chunk_size must be > 0"));
        }
        if chunk_overlap >= chunk_size {
            return Err(KbError::invalid(format!(
                "chunk_overlap ({}) must be in [0, {})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// 텍스트 분할
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return vec![];
        }

        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let window_end = start + self.chunk_size;

            // 남은 꼬리가 윈도우에 들어가면 마지막 청크
            if window_end >= chars.len() {
                push_trimmed(&mut chunks, &chars[start..]);
                break;
            }

            let search_from = start + self.chunk_size / 2;
            let end = last_breakpoint_end(&chars, search_from, window_end)
                .filter(|&e| e > start)
                .unwrap_or(window_end);

            push_trimmed(&mut chunks, &chars[start..end]);

            // 오버랩이 커도 항상 앞으로 진행
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        tracing::debug!(
            "Split text: chars={}, chunks={}",
            chars.len(),
            chunks.len()
        );
        chunks
    }
}

impl Chunker for TextSplitter {
    fn chunk(&self, text: &str) -> Vec<String> {
        self.split(text)
    }

    fn name(&self) -> &'static str {
        "TextSplitter"
    }
}

/// 일회성 분할 (파라미터 검증 포함)
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<String>> {
    Ok(TextSplitter::new(chunk_size, chunk_overlap)?.split(text))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `[from, to)` 범위 안에 완전히 들어가는 마지막 분할 지점의 끝 위치
fn last_breakpoint_end(chars: &[char], from: usize, to: usize) -> Option<usize> {
    BREAKPOINTS
        .iter()
        .filter_map(|bp| {
            let pattern: Vec<char> = bp.chars().collect();
            rfind_in(chars, &pattern, from, to).map(|pos| pos + pattern.len())
        })
        .max()
}

/// `chars[from..to]` 안에서 `pattern`이 마지막으로 등장하는 시작 위치
fn rfind_in(chars: &[char], pattern: &[char], from: usize, to: usize) -> Option<usize> {
    let to = to.min(chars.len());
    if pattern.is_empty() || from >= to || to - from < pattern.len() {
        return None;
    }
    (from..=to - pattern.len())
        .rev()
        .find(|&i| chars[i..i + pattern.len()] == *pattern)
}

fn push_trimmed(chunks: &mut Vec<String>, slice: &[char]) {
    let chunk: String = slice.iter().collect();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 설정 기반 청커 생성
pub fn default_chunker(config: &ChunkingConfig) -> Result<Box<dyn Chunker>> {
    Ok(Box::new(TextSplitter::from_config(config)?))
}

// ============================================================================
// Tests
// ============================================================================

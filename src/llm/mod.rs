//! LLM 모듈 - OpenAI 호환 Chat Completions 클라이언트
//!
//! RAG 답변 생성과 지식 메타데이터(제목/태그/출처) 제안에 사용합니다.
//! 기본값은 DeepSeek (`deepseek-chat`)입니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

// ============================================================================
// Types
// ============================================================================

/// 토큰 사용량
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// 생성 결과
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub reply: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
}

/// AI가 제안한 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuggestedMetadata {
    #[serde(default)]
    pub title: String,
    /// 쉼표 구분 태그
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub source: String,
}

// ============================================================================
// GenerationService Trait
// ============================================================================

/// 텍스트 생성 서비스 트레이트
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// 시스템 메시지 + 사용자 메시지로 답변 생성
    ///
    /// `provider`는 힌트이며 구현체가 무시할 수 있습니다.
    async fn complete(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        provider: Option<&str>,
    ) -> Result<Completion>;
}

const METADATA_SYSTEM_PROMPT: &str = "You are a knowledge management assistant. \
From the text the user provides, produce metadata:\n\
1. title: a concise title (at most 10 words) summarising the topic\n\
2. tags: 3-5 comma-separated tags covering the key topics (e.g. \"Python,decorators,programming\")\n\
3. source: the kind of source, one of: lecture, note, paper, textbook, document, blog, code, other\n\n\
Reply with JSON only, in exactly this shape:\n\
{\"title\": \"...\", \"tags\": \"...\", \"source\": \"...\"}";

/// 메타데이터 제안 시 모델에 보내는 최대 문자 수
const METADATA_PREVIEW_CHARS: usize = 1500;

/// 콘텐츠 앞부분으로 제목/태그/출처 제안
pub async fn suggest_metadata(
    llm: &dyn GenerationService,
    content: &str,
) -> Result<SuggestedMetadata> {
    let preview: String = content.chars().take(METADATA_PREVIEW_CHARS).collect();
    tracing::info!("Suggesting metadata (preview {} chars)", preview.chars().count());

    let completion = llm
        .complete(
            &format!("Generate metadata for the following content:\n\n{}", preview),
            Some(METADATA_SYSTEM_PROMPT),
            None,
        )
        .await
        .context("Metadata generation failed")?;

    parse_metadata_reply(&completion.reply)
}

/// 모델 응답에서 JSON 추출 (```json 펜스 허용)
fn parse_metadata_reply(reply: &str) -> Result<SuggestedMetadata> {
    let mut body = reply.trim();
    if let Some(fenced) = body.split("```").nth(1) {
        body = fenced.strip_prefix("json").unwrap_or(fenced).trim();
    }

    serde_json::from_str(body)
        .with_context(|| format!("Model returned invalid metadata JSON: {}", reply))
}

// ============================================================================
// ChatClient
// ============================================================================

/// OpenAI 호환 Chat Completions 클라이언트
#[derive(Debug)]
pub struct ChatClient {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
    provider: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ChatClient {
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            provider: config.provider.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, config)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request<'a>(
        &'a self,
        user_message: &'a str,
        system_message: Option<&'a str>,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_message {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_message,
        });

        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl GenerationService for ChatClient {
    async fn complete(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        provider: Option<&str>,
    ) -> Result<Completion> {
        if let Some(hint) = provider {
            if hint != self.provider {
                tracing::debug!(
                    "Provider hint '{}' ignored, using '{}'",
                    hint,
                    self.provider
                );
            }
        }

        tracing::info!(
            "Calling {} ({}), message length: {}",
            self.provider,
            self.model,
            user_message.chars().count()
        );

        let request = self.build_request(user_message, system_message);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                anyhow::bail!("{} API error ({}): {}", self.provider, status, error.error.message);
            }
            anyhow::bail!("{} API error ({}): {}", self.provider, status, body);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse chat response")?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("{} returned an empty reply", self.provider))?;

        tracing::info!(
            "{} replied, tokens: prompt={} completion={}",
            self.provider,
            parsed.usage.prompt_tokens,
            parsed.usage.completion_tokens
        );

        Ok(Completion {
            reply,
            provider: self.provider.clone(),
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            usage: parsed.usage,
        })
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `DEEPSEEK_API_KEY`
/// 2. `LLM_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in ["DEEPSEEK_API_KEY", "LLM_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using LLM API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!("LLM API key not found. Set DEEPSEEK_API_KEY or LLM_API_KEY environment variable.")
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_request_shape() {
        let client = ChatClient::new("key".to_string(), &LlmConfig::default()).unwrap();
        assert_eq!(client.endpoint(), "https://api.deepseek.com/chat/completions");

        let request = client.build_request("question", Some("rules"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "rules");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 2048);

        let request = client.build_request("question", None);
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{
            "model": "deepseek-chat",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
        assert_eq!(
            parsed.usage,
            Usage {
                prompt_tokens: 12,
                completion_tokens: 3
            }
        );
    }

    #[test]
    fn test_parse_metadata_plain_and_fenced() {
        let plain = r#"{"title": "Decorators", "tags": "python,decorators", "source": "note"}"#;
        let meta = parse_metadata_reply(plain).unwrap();
        assert_eq!(meta.title, "Decorators");
        assert_eq!(meta.tags, "python,decorators");

        let fenced = "```json\n{\"title\": \"T\", \"tags\": \"a,b\", \"source\": \"blog\"}\n```";
        let meta = parse_metadata_reply(fenced).unwrap();
        assert_eq!(meta.source, "blog");

        assert!(parse_metadata_reply("not json").is_err());
    }

    #[tokio::test]
    async fn test_suggest_metadata_sends_preview() {
        let llm = ScriptedGenerator::replying(r#"{"title": "T", "tags": "x", "source": "note"}"#);
        let content = "가".repeat(3000);
        let meta = suggest_metadata(&llm, &content).await.unwrap();
        assert_eq!(meta.title, "T");

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].user.chars().count() < 1600);
        assert!(calls[0].system.as_deref().unwrap().contains("JSON"));
    }
}

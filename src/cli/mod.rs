//! CLI 모듈
//!
//! kb-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider, OpenAiEmbedding};
use crate::knowledge::{
    parse_tags, DeleteOutcome, KnowledgeBase, MetadataUpdate, NewItem, RawDocument, RawStore,
    UpdateOutcome,
};
use crate::llm::{self, suggest_metadata, ChatClient, GenerationService};
use crate::rag::RagService;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "kb-rag")]
#[command(version, about = "개인 지식베이스 + RAG 질의응답", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트 또는 파일을 지식베이스에 추가
    Add {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 추가할 파일 경로 (UTF-8 텍스트)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 제목 (생략 시 AI 제안)
        #[arg(long)]
        title: Option<String>,

        /// 쉼표 구분 태그 (생략 시 AI 제안)
        #[arg(long)]
        tags: Option<String>,

        /// 출처 (생략 시 AI 제안)
        #[arg(long)]
        source: Option<String>,
    },

    /// 시맨틱 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// 태그 필터
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// 지식베이스 기반 질의응답
    Ask {
        /// 질문
        question: String,

        /// 검색할 청크 수
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// 생성 프로바이더 힌트
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// 저장된 지식 목록
    List {
        /// 태그 필터
        #[arg(short, long)]
        tag: Option<String>,

        /// 조회할 청크 행 수 상한
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// 지식 항목 조회
    Get {
        /// 지식 ID (kb_xxxxxxxx)
        id: String,

        /// 청크 대신 저장된 원문 출력
        #[arg(long)]
        raw: bool,
    },

    /// 지식 항목 수정
    Update {
        /// 지식 ID
        id: String,

        #[arg(long)]
        title: Option<String>,

        /// 쉼표 구분 태그 (기존 태그를 대체)
        #[arg(long)]
        tags: Option<String>,

        #[arg(long)]
        source: Option<String>,

        /// 새 본문 텍스트 (재청킹 + 재임베딩)
        #[arg(short, long)]
        text: Option<String>,

        /// 새 본문 파일
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// 지식 항목 삭제
    Delete {
        /// 삭제할 지식 ID
        id: String,
    },

    /// 태그/출처 통계
    Stats,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load().context("설정 로드 실패")?;

    match cli.command {
        Commands::Add {
            text,
            file,
            title,
            tags,
            source,
        } => cmd_add(&config, text, file, title, tags, source).await,
        Commands::Search { query, top_k, tag } => {
            cmd_search(&config, &query, top_k, tag.as_deref()).await
        }
        Commands::Ask {
            question,
            top_k,
            provider,
        } => cmd_ask(&config, &question, top_k, provider.as_deref()).await,
        Commands::List { tag, limit } => cmd_list(&config, tag.as_deref(), limit).await,
        Commands::Get { id, raw } => cmd_get(&config, &id, raw).await,
        Commands::Update {
            id,
            title,
            tags,
            source,
            text,
            file,
        } => {
            let update = MetadataUpdate {
                title,
                tags: tags.map(|t| parse_tags(&t)),
                source,
            };
            cmd_update(&config, &id, update, text, file).await
        }
        Commands::Delete { id } => cmd_delete(&config, &id).await,
        Commands::Stats => cmd_stats(&config).await,
        Commands::Status => cmd_status(&config).await,
    }
}

// ============================================================================
// Handles
// ============================================================================

/// 임베딩 API 키 확인
fn require_embedding_key() -> Result<()> {
    if !embedding::has_api_key() {
        bail!(
            "임베딩 API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export SILICONFLOW_API_KEY=your-api-key\n  \
             또는\n  \
             export EMBEDDING_API_KEY=your-api-key"
        );
    }
    Ok(())
}

/// 지식베이스 열기
///
/// 조회 전용 명령어는 임베딩을 호출하지 않으므로 API 키 없이도 열 수 있습니다.
async fn open_kb(config: &Config, require_key: bool) -> Result<KnowledgeBase> {
    if require_key {
        require_embedding_key()?;
    }
    let api_key = embedding::get_api_key().unwrap_or_default();
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        OpenAiEmbedding::new(api_key, &config.embedding).context("임베딩 클라이언트 생성 실패")?,
    );

    KnowledgeBase::open(config, embedder)
        .await
        .context("지식베이스 열기 실패")
}

/// 생성 클라이언트 (API 키 없으면 None)
fn chat_client(config: &Config) -> Result<Option<Arc<dyn GenerationService>>> {
    if !llm::has_api_key() {
        return Ok(None);
    }
    let client: Arc<dyn GenerationService> =
        Arc::new(ChatClient::from_config(&config.llm).context("LLM 클라이언트 생성 실패")?);
    Ok(Some(client))
}

/// `--text` 또는 `--file`에서 본문 읽기
async fn read_content(text: Option<String>, file: Option<PathBuf>) -> Result<Option<String>> {
    match (text, file) {
        (Some(_), Some(_)) => bail!("--text와 --file은 함께 사용할 수 없습니다"),
        (Some(text), None) => Ok(Some(text)),
        (None, Some(path)) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("파일 읽기 실패: {}", path.display()))?;
            Ok(Some(content))
        }
        (None, None) => Ok(None),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 추가 명령어 (add)
///
/// 누락된 메타데이터는 LLM으로 제안받고, 실패하면 기본값을 사용합니다.
async fn cmd_add(
    config: &Config,
    text: Option<String>,
    file: Option<PathBuf>,
    title: Option<String>,
    tags: Option<String>,
    source: Option<String>,
) -> Result<()> {
    let Some(content) = read_content(text, file).await? else {
        bail!("--text 또는 --file 중 하나를 지정해야 합니다");
    };
    if content.trim().is_empty() {
        bail!("내용이 비어 있습니다");
    }

    let kb = open_kb(config, true).await?;

    let (mut title, mut tags, mut source) = (title, tags.map(|t| parse_tags(&t)), source);
    if title.is_none() || tags.is_none() || source.is_none() {
        match chat_client(config)? {
            Some(llm) => {
                println!("[*] AI 메타데이터 제안 중...");
                match suggest_metadata(llm.as_ref(), &content).await {
                    Ok(meta) => {
                        title = title.or(Some(meta.title).filter(|t| !t.trim().is_empty()));
                        tags = tags.or(Some(parse_tags(&meta.tags)));
                        source = source.or(Some(meta.source).filter(|s| !s.trim().is_empty()));
                    }
                    Err(e) => {
                        tracing::warn!("Metadata suggestion failed: {:#}", e);
                        println!("[!] 메타데이터 제안 실패, 기본값을 사용합니다");
                    }
                }
            }
            None => tracing::debug!("No LLM API key, using default metadata"),
        }
    }

    let item = NewItem {
        content: content.clone(),
        title: title.unwrap_or_else(|| "Untitled".to_string()),
        tags: tags.unwrap_or_default(),
        source: source.unwrap_or_else(|| "note".to_string()),
    };

    println!("[*] 청킹 및 임베딩 생성 중...");
    let added = kb.add(item.clone()).await.context("지식 추가 실패")?;

    let raw = RawStore::new(config.raw_dir());
    let raw_path = raw
        .save(&RawDocument {
            id: added.id.clone(),
            title: item.title,
            tags: item.tags,
            source: item.source,
            content,
        })
        .await
        .context("원문 저장 실패")?;

    println!("[OK] 지식이 추가되었습니다 (ID: {})", added.id);
    println!("     제목: {}", added.title);
    println!("     태그: {}", display_tags(&added.tags));
    println!("     청크: {} 개", added.chunk_count);
    println!("     원문: {}", raw_path.display());

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: &Config, query: &str, top_k: usize, tag: Option<&str>) -> Result<()> {
    let kb = open_kb(config, true).await?;

    println!("[*] 검색 중: \"{}\"", query);
    let response = kb.search(query, top_k, tag).await.context("검색 실패")?;

    if response.empty {
        println!("\n[!] 지식베이스가 비어 있습니다. 먼저 `kb-rag add`로 지식을 추가하세요.");
        return Ok(());
    }
    if response.results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", response.total_results);

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. [관련도: {:.4}] {} ({})",
            i + 1,
            result.relevance,
            result.title,
            result.item_id
        );
        println!(
            "   태그: {} | 출처: {} | 청크 #{}",
            display_tags(&result.tags),
            result.source,
            result.chunk_index
        );
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 질의응답 명령어 (ask)
async fn cmd_ask(
    config: &Config,
    question: &str,
    top_k: usize,
    provider: Option<&str>,
) -> Result<()> {
    let kb = Arc::new(open_kb(config, true).await?);
    let Some(llm) = chat_client(config)? else {
        bail!(
            "LLM API 키가 설정되지 않았습니다.\n\
             설정: export DEEPSEEK_API_KEY=your-key"
        );
    };

    let rag = RagService::new(kb, llm, config.rag.clone());

    println!("[*] 질문: {}", question);
    let answer = rag
        .ask(question, top_k, provider)
        .await
        .context("질의응답 실패")?;

    println!("\n{}\n", answer.answer);

    if !answer.sources.is_empty() {
        println!("[참고 자료] (컨텍스트 청크 {} 개)", answer.context_chunks_used);
        for source in &answer.sources {
            println!(
                "  - {} ({}, 관련도: {:.2})",
                source.title, source.item_id, source.relevance
            );
        }
    }

    if let (Some(model), Some(usage)) = (&answer.model, &answer.usage) {
        println!(
            "\n[*] {} | 토큰: prompt {} / completion {}",
            model, usage.prompt_tokens, usage.completion_tokens
        );
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(config: &Config, tag: Option<&str>, limit: usize) -> Result<()> {
    let kb = open_kb(config, false).await?;
    let list = kb.list(tag, limit).await.context("목록 조회 실패")?;

    if list.items.is_empty() {
        println!("[!] 저장된 지식이 없습니다.");
        return Ok(());
    }

    println!(
        "[OK] 저장된 지식 ({} 건, 전체 청크 {} 개):\n",
        list.total_items, list.total_chunks
    );

    for item in &list.items {
        println!("  {} {}", item.id, truncate_text(&item.title, 40));
        println!(
            "        태그: {} | 출처: {} | 청크 {} 개",
            display_tags(&item.tags),
            item.source,
            item.total_chunks
        );
        println!("        {}", truncate_text(&item.preview, 100));
        println!();
    }

    Ok(())
}

/// 조회 명령어 (get)
async fn cmd_get(config: &Config, id: &str, raw: bool) -> Result<()> {
    if raw {
        let store = RawStore::new(config.raw_dir());
        match store.load(id).await.context("원문 조회 실패")? {
            Some(doc) => {
                println!("[OK] {} - {}\n", doc.id, doc.title);
                println!("{}", doc.content);
            }
            None => println!("[!] 원문을 찾을 수 없습니다: {}", id),
        }
        return Ok(());
    }

    let kb = open_kb(config, false).await?;
    let Some(item) = kb.get(id).await.context("지식 조회 실패")? else {
        println!("[!] 지식을 찾을 수 없습니다: {}", id);
        return Ok(());
    };

    println!("[OK] {}", item.id);
    println!("     제목: {}", item.title);
    println!("     태그: {}", display_tags(&item.tags));
    println!("     출처: {}", item.source);
    println!("     생성: {}", item.created_at.format("%Y-%m-%d %H:%M"));
    println!("     청크: {} 개\n", item.chunks.len());

    for chunk in &item.chunks {
        println!("--- chunk #{} ({} chars) ---", chunk.chunk_index, chunk.text.chars().count());
        println!("{}\n", chunk.text);
    }

    Ok(())
}

/// 수정 명령어 (update)
///
/// 메타데이터만 바꾸면 재임베딩하지 않습니다. 본문을 바꾸면 모든 청크를 다시 만듭니다.
async fn cmd_update(
    config: &Config,
    id: &str,
    update: MetadataUpdate,
    text: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let content = read_content(text, file).await?;
    if update.is_empty() && content.is_none() {
        bail!("수정할 항목을 지정하세요 (--title, --tags, --source, --text, --file)");
    }

    let kb = open_kb(config, content.is_some()).await?;

    if !update.is_empty() {
        match kb
            .update_metadata(id, update)
            .await
            .context("메타데이터 수정 실패")?
        {
            UpdateOutcome::NotFound => {
                println!("[!] 지식을 찾을 수 없습니다: {}", id);
                return Ok(());
            }
            UpdateOutcome::Updated { chunks } => {
                println!("[OK] 메타데이터 수정됨 ({} 청크)", chunks);
            }
        }
    }

    if let Some(content) = &content {
        match kb
            .update_content(id, content)
            .await
            .context("본문 수정 실패")?
        {
            UpdateOutcome::NotFound => {
                println!("[!] 지식을 찾을 수 없습니다: {}", id);
                return Ok(());
            }
            UpdateOutcome::Updated { chunks } => {
                println!("[OK] 본문 교체됨 ({} 청크 재생성)", chunks);
            }
        }
    }

    sync_raw(config, &kb, id, content).await
}

/// 수정 후 원문 파일의 front matter/본문 갱신
async fn sync_raw(
    config: &Config,
    kb: &KnowledgeBase,
    id: &str,
    content: Option<String>,
) -> Result<()> {
    let Some(item) = kb.get(id).await.context("지식 조회 실패")? else {
        return Ok(());
    };

    let store = RawStore::new(config.raw_dir());
    let content = match content {
        Some(content) => content,
        None => match store.load(id).await.context("원문 조회 실패")? {
            Some(doc) => doc.content,
            None => return Ok(()),
        },
    };

    store
        .save(&RawDocument {
            id: item.id,
            title: item.title,
            tags: item.tags,
            source: item.source,
            content,
        })
        .await
        .context("원문 저장 실패")?;

    Ok(())
}

/// 삭제 명령어 (delete)
///
/// 벡터 인덱스의 청크와 원문 파일을 함께 삭제합니다.
async fn cmd_delete(config: &Config, id: &str) -> Result<()> {
    let kb = open_kb(config, false).await?;

    let outcome = kb.delete(id).await.context("지식 삭제 실패")?;
    let raw_deleted = RawStore::new(config.raw_dir())
        .delete(id)
        .await
        .context("원문 삭제 실패")?;

    match outcome {
        DeleteOutcome::Deleted { chunks } => {
            println!("[OK] 지식 {} 삭제됨 ({} 청크)", id, chunks);
            if raw_deleted {
                println!("     원문 파일도 삭제되었습니다");
            }
        }
        DeleteOutcome::NotFound => {
            println!("[!] 지식을 찾을 수 없습니다: {}", id);
        }
    }

    Ok(())
}

/// 통계 명령어 (stats)
async fn cmd_stats(config: &Config) -> Result<()> {
    let kb = open_kb(config, false).await?;
    let stats = kb.stats().await.context("통계 조회 실패")?;

    println!("[OK] 지식 {} 건, 청크 {} 개", stats.total_items, stats.total_chunks);

    if !stats.tags.is_empty() {
        println!("\n[태그]");
        for (tag, count) in sorted_by_count(&stats.tags) {
            println!("  {:<20} {}", tag, count);
        }
    }

    if !stats.sources.is_empty() {
        println!("\n[출처]");
        for (source, count) in sorted_by_count(&stats.sources) {
            println!("  {:<20} {}", source, count);
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &Config) -> Result<()> {
    println!("kb-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 임베딩: {} ({}차원)",
        config.embedding.model, config.embedding.dimension
    );
    println!("[*] LLM: {} ({})", config.llm.provider, config.llm.model);

    if embedding::has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정");
        println!("    설정: export SILICONFLOW_API_KEY=your-key");
    }

    if llm::has_api_key() {
        println!("[OK] LLM API 키: 설정됨");
    } else {
        println!("[!] LLM API 키: 미설정");
        println!("    설정: export DEEPSEEK_API_KEY=your-key");
    }

    match open_kb(config, false).await {
        Ok(kb) => match kb.stats().await {
            Ok(stats) => {
                println!(
                    "[OK] 저장된 지식: {} 건 ({} 청크)",
                    stats.total_items, stats.total_chunks
                );
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] 지식베이스 열기 실패: {:#}", e);
        }
    }

    let raw_dir = config.raw_dir();
    if raw_dir.exists() {
        println!("[*] 원문 저장소: {} ({})", raw_dir.display(), format_bytes(dir_size(&raw_dir)));
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

fn display_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        "-".to_string()
    } else {
        tags.join(", ")
    }
}

/// 빈도 내림차순 (같으면 이름순)
fn sorted_by_count<'a>(
    counts: impl IntoIterator<Item = (&'a String, &'a usize)>,
) -> Vec<(&'a String, usize)> {
    let mut pairs: Vec<(&String, usize)> = counts.into_iter().map(|(k, v)| (k, *v)).collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    pairs
}

/// 디렉토리 내 파일 크기 합계 (하위 디렉토리 제외)
fn dir_size(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len() as usize)
                .sum()
        })
        .unwrap_or(0)
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Raw Store - 청킹 전 원문 보관
//!
//! 항목마다 `<raw_dir>/<id>.md` 파일 하나를 씁니다.
//! 파일 앞부분에 front matter(id, title, tags, source)를 두고 그 뒤에 원문을 그대로 둡니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const FRONT_MATTER_FENCE: &str = "---";

/// 원문 문서
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source: String,
    pub content: String,
}

/// 원문 Markdown 저장소
#[derive(Debug, Clone)]
pub struct RawStore {
    dir: PathBuf,
}

impl RawStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 항목 ID의 파일 경로 (ID에 경로 구분자가 있으면 거부)
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            anyhow::bail!("Invalid knowledge id: {:?}", id);
        }
        Ok(self.dir.join(format!("{}.md", id)))
    }

    /// 원문 저장 (기존 파일 덮어쓰기)
    pub async fn save(&self, doc: &RawDocument) -> Result<PathBuf> {
        let path = self.path_for(&doc.id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create raw directory")?;

        tokio::fs::write(&path, render(doc))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!("Saved raw markdown: {}", path.display());
        Ok(path)
    }

    /// 원문 로드 (없으면 None)
    pub async fn load(&self, id: &str) -> Result<Option<RawDocument>> {
        let path = self.path_for(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(parse(id, &text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// 원문 삭제 (삭제했으면 true)
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("Deleted raw markdown: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

fn render(doc: &RawDocument) -> String {
    format!(
        "{fence}\nid: {}\ntitle: {}\ntags: [{}]\nsource: {}\n{fence}\n\n{}",
        doc.id,
        single_line(&doc.title),
        doc.tags.join(", "),
        single_line(&doc.source),
        doc.content,
        fence = FRONT_MATTER_FENCE,
    )
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

/// front matter 파싱 (없거나 깨졌으면 전체를 본문으로)
fn parse(id: &str, text: &str) -> RawDocument {
    let mut doc = RawDocument {
        id: id.to_string(),
        title: String::new(),
        tags: Vec::new(),
        source: String::new(),
        content: text.to_string(),
    };

    let Some(rest) = text.strip_prefix("---\n") else {
        return doc;
    };
    let Some((header, body)) = rest.split_once("\n---\n") else {
        return doc;
    };

    for line in header.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "title" => doc.title = value.to_string(),
            "source" => doc.source = value.to_string(),
            "tags" => {
                let inner = value.trim_start_matches('[').trim_end_matches(']');
                doc.tags = super::index::parse_tags(inner);
            }
            _ => {}
        }
    }

    doc.content = body.strip_prefix('\n').unwrap_or(body).to_string();
    doc
}

// ============================================================================
// Tests
// ============================================================================

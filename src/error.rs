//! 에러 타입
//!
//! 라이브러리 경계에서 사용하는 닫힌 에러 분류입니다.
//! CLI 레이어는 anyhow로 감싸서 사용합니다.

use thiserror::Error;

/// 지식베이스 에러
#[derive(Debug, Error)]
pub enum KbError {
    /// 잘못된 인자 (청크 크기, 태그 필터, 빈 입력 등) - 부작용 없이 즉시 실패
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 외부 서비스 실패 (임베딩, 벡터 인덱스, 생성 모델)
    #[error("{op} failed: {source}")]
    Upstream {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl KbError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn upstream(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            op,
            source: source.into(),
        }
    }

    /// 재시도로 해결될 수 있는 에러인지 (외부 서비스 실패만 해당)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

pub type Result<T> = std::result::Result<T, KbError>;

/// `anyhow::Result`를 `KbError::Upstream`으로 변환하는 헬퍼
pub(crate) trait UpstreamExt<T> {
    fn upstream(self, op: &'static str) -> Result<T>;
}

impl<T> UpstreamExt<T> for anyhow::Result<T> {
    fn upstream(self, op: &'static str) -> Result<T> {
        self.map_err(|e| KbError::upstream(op, e))
    }
}

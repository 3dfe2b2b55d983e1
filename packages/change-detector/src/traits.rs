use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchResult;

// ============================================================================
// FETCHER: Network access (conditional GET against the origin)
// ============================================================================

/// Conditional fetch of one origin path.
///
/// Implementations send the stored validator as an `If-None-Match`
/// precondition when one is given, and report the raw status. Status
/// interpretation is shared by the poller and crawler via
/// [`FetchResponse::classify`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, path: &str, validator: Option<&str>) -> FetchResult<FetchResponse>;
}

/// A settled response: status, the new validator (ETag) and the full body.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub validator: Option<String>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, validator: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            validator,
            body: body.into(),
        }
    }

    pub fn classify(self) -> FetchOutcome {
        match self.status {
            200 => FetchOutcome::Body {
                body: self.body,
                validator: self.validator,
            },
            304 => FetchOutcome::NotModified,
            403 | 404 => FetchOutcome::Absent,
            status => FetchOutcome::Unexpected(status),
        }
    }
}

/// The only four response classes the engine distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 200: the body, plus whatever validator came with it
    Body {
        body: Bytes,
        validator: Option<String>,
    },
    /// 304: the stored validator still matches
    NotModified,
    /// 403 or 404
    Absent,
    Unexpected(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_codes() {
        let ok = FetchResponse::new(200, Some("\"e\"".into()), "hi").classify();
        assert_eq!(
            ok,
            FetchOutcome::Body {
                body: Bytes::from_static(b"hi"),
                validator: Some("\"e\"".into()),
            }
        );
        assert_eq!(FetchResponse::new(304, None, "").classify(), FetchOutcome::NotModified);
        assert_eq!(FetchResponse::new(403, None, "").classify(), FetchOutcome::Absent);
        assert_eq!(FetchResponse::new(404, None, "").classify(), FetchOutcome::Absent);
        assert_eq!(
            FetchResponse::new(500, None, "").classify(),
            FetchOutcome::Unexpected(500)
        );
        assert_eq!(
            FetchResponse::new(301, None, "").classify(),
            FetchOutcome::Unexpected(301)
        );
    }
}

use crate::CaptureError;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Shared-secret bearer authentication. Without a token every request passes.
#[derive(Clone, Default)]
pub struct BearerAuth {
    token: Option<Arc<str>>,
}

impl BearerAuth {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Checks a raw `Authorization` header value.
    pub fn check(&self, header: Option<&str>) -> Result<(), CaptureError> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };
        let header = header.ok_or(CaptureError::MissingCredential)?;

        let mut parts = header.splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next().unwrap_or_default();

        if scheme == "Bearer" && constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(CaptureError::InvalidCredential)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// axum middleware guarding the capture routes.
pub async fn require_bearer(State(auth): State<BearerAuth>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default());

    match auth.check(header) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

//! Scripted transport for auth tests

use crate::auth::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::AuthError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::Instant;

/// Replies with queued responses in order and records every request
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, AuthError>>>,
    requests: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::new(status, body)));
    }

    pub fn push_error(&self, error: AuthError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Times at which requests to URLs containing `fragment` were sent
    pub fn times_for(&self, fragment: &str) -> Vec<Instant> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, r)| r.url.contains(fragment))
            .map(|(at, _)| *at)
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        self.requests.lock().push((Instant::now(), request.clone()));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Network(format!("no scripted reply for {}", request.url))))
    }
}

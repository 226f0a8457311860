//! Mirror URL substitution and origin fallback

use lodestone_types::{DownloadTask, OriginFallback};
use std::fmt;
use std::sync::Arc;
use url::Url;

pub type UrlRewrite = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rewrites origin URLs onto a mirror and decides which URL each attempt
/// uses.
#[derive(Clone)]
pub struct MirrorPolicy {
    rewrite: Option<UrlRewrite>,
    fallback: OriginFallback,
}

impl MirrorPolicy {
    /// Always download from the origin
    pub fn none() -> Self {
        Self {
            rewrite: None,
            fallback: OriginFallback::Never,
        }
    }

    pub fn new(rewrite: UrlRewrite, fallback: OriginFallback) -> Self {
        Self {
            rewrite: Some(rewrite),
            fallback,
        }
    }

    /// Replace scheme and host of every URL with `base`, keeping the path
    pub fn with_base(base: &str, fallback: OriginFallback) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self::new(
            Arc::new(move |origin: &str| match Url::parse(origin) {
                Ok(url) => {
                    let mut rewritten = format!("{}{}", base, url.path());
                    if let Some(query) = url.query() {
                        rewritten.push('?');
                        rewritten.push_str(query);
                    }
                    rewritten
                }
                Err(_) => origin.to_string(),
            }),
            fallback,
        )
    }

    pub fn fallback(&self) -> OriginFallback {
        self.fallback
    }

    /// The download URL for an origin URL
    pub fn rewrite(&self, origin: &str) -> String {
        match &self.rewrite {
            Some(rewrite) => rewrite(origin),
            None => origin.to_string(),
        }
    }

    /// URL used for the 1-based `attempt` of `task`.
    ///
    /// With `FinalAttempt`, the last allowed attempt goes to the origin when
    /// the task has more than one attempt and was mirrored.
    pub fn url_for_attempt<'a>(&self, task: &'a DownloadTask, attempt: u32) -> &'a str {
        let final_attempt = task.max_retries > 1 && attempt >= task.max_retries;
        if self.fallback == OriginFallback::FinalAttempt
            && final_attempt
            && task.download_url != task.origin_url
        {
            &task.origin_url
        } else {
            &task.download_url
        }
    }
}

impl Default for MirrorPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for MirrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorPolicy")
            .field("rewrite", &self.rewrite.is_some())
            .field("fallback", &self.fallback)
            .finish()
    }
}

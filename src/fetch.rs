//! Plain-text web fetching for the link-reading command.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error};
use zapflow_core::{error::ZapError, traits::WebFetcher};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

const HIDDEN_BLOCKS: &str =
    r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)\s*>";
const TAGS: &str = r"(?s)<[^>]*>";

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("fetch pattern failed to compile: {e}");
            None
        }
    })
    .as_ref()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduce an HTML document to its visible text, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    static BLOCKS_RE: OnceLock<Option<Regex>> = OnceLock::new();
    static TAGS_RE: OnceLock<Option<Regex>> = OnceLock::new();

    let mut text = html.to_string();
    for (cell, pattern) in [(&BLOCKS_RE, HIDDEN_BLOCKS), (&TAGS_RE, TAGS)] {
        if let Some(re) = compiled(cell, pattern) {
            text = re.replace_all(&text, " ").into_owned();
        }
    }
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    collapse_whitespace(&decoded)
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<String, ZapError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ZapError::Fetch(format!("unsupported url: {url}")));
        }
        debug!("fetch: GET {url}");

        let resp = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ZapError::Fetch(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ZapError::Fetch(format!("{url} returned {}", resp.status())));
        }

        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = resp
            .text()
            .await
            .map_err(|e| ZapError::Fetch(format!("failed to read body: {e}")))?;

        let text = if is_html {
            html_to_text(&body)
        } else {
            collapse_whitespace(&body)
        };
        Ok(truncate_chars(&text, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_drops_scripts_and_tags() {
        let html = r#"<html><head><title>x</title><style>p{}</style></head>
            <body><script>alert("hi")</script><h1>Preços</h1>
            <p>Plano &amp; suporte:   R$ 99</p></body></html>"#;
        assert_eq!(html_to_text(html), "Preços Plano & suporte: R$ 99");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ação rápida", 4), "ação");
        assert_eq!(truncate_chars("curto", 100), "curto");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let err = HttpFetcher::new()
            .fetch_text("file:///etc/passwd", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ZapError::Fetch(_)));
    }
}

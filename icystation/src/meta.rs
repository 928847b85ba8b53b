//! Now-playing metadata fetch and formatting.
//!
//! The fetcher pulls a bounded JSON document from the station's metadata
//! endpoint and renders it through the configured template.  It only produces
//! the value; whether it gets published is the poller's decision.

use crate::error::{Error, Result};
use icyconfig::BuildConfig;
use serde_json::Value;
use std::time::Duration;

/// Refuse to buffer metadata documents beyond this size.
pub const MAX_DOCUMENT_BYTES: usize = 64 * 1024;

pub struct MetadataFetcher {
    client: reqwest::Client,
    url: String,
    rules: BuildConfig,
}

impl MetadataFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration, rules: BuildConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            rules,
        })
    }

    /// Fetch the endpoint once and render the ICY string.
    pub async fn fetch(&self) -> Result<String> {
        let mut response = self
            .client
            .get(&self.url)
            .header("Cache-Control", "no-store")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UpstreamStatus(response.status().as_u16()));
        }

        let mut body = Vec::with_capacity(8 * 1024);
        while let Some(chunk) = response.chunk().await? {
            let remaining = MAX_DOCUMENT_BYTES - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let document: Value = serde_json::from_slice(&body)?;
        Ok(build_icy_string(&self.rules, &document))
    }
}

/// Render the template against a JSON document.
///
/// Placeholders are `{token}` runs; each is resolved positionally against
/// `fallback_key_order` (dotted paths into nested objects) and then against
/// the top-level key of the same name.  Missing values become the empty
/// string.
pub fn build_icy_string(rules: &BuildConfig, document: &Value) -> String {
    let tokens = placeholders(&rules.format);

    let mut result = rules.format.clone();
    for (index, token) in tokens.iter().enumerate() {
        let raw = rules
            .fallback_key_order
            .get(index)
            .and_then(|path| lookup_path(document, path))
            .or_else(|| document.get(token.as_str()).and_then(Value::as_str))
            .unwrap_or("");
        // Sanitize the value, not the template: the format's own quotes ARE
        // the ICY delimiters and must survive.
        let value = if rules.strip_single_quotes {
            raw.replace('\'', "")
        } else {
            raw.to_string()
        };
        result = result.replace(&format!("{{{token}}}"), &value);
    }

    if rules.normalize_whitespace {
        result = result.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    result
}

/// Ordered, de-duplicated `{token}` names by first appearance.
fn placeholders(template: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let token = &rest[open + 1..open + close];
        if !token.is_empty() && !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    tokens
}

/// Traverse a dotted path (`now.song.artist`) through nested objects.
fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a str> {
    let mut current = document;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    current.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rules(format: &str, fallback: &[&str]) -> BuildConfig {
        BuildConfig {
            format: format.to_string(),
            strip_single_quotes: true,
            normalize_whitespace: true,
            fallback_key_order: fallback.iter().map(|s| s.to_string()).collect(),
            encoding: String::new(),
        }
    }

    #[test]
    fn substitutes_top_level_keys() {
        let document = json!({"artist": "Miles Davis", "title": "So What"});
        let text = build_icy_string(
            &rules("StreamTitle='{artist} - {title}';", &[]),
            &document,
        );
        assert_eq!(text, "StreamTitle='Miles Davis - So What';");
    }

    #[test]
    fn missing_keys_become_empty() {
        let document = json!({"artist": "Miles Davis"});
        let text = build_icy_string(
            &rules("StreamTitle='{artist} - {title}';", &[]),
            &document,
        );
        assert_eq!(text, "StreamTitle='Miles Davis - ';");
    }

    #[test]
    fn fallback_paths_traverse_nested_objects() {
        let document = json!({
            "now": {"song": {"artist": "Nina Simone", "name": "Sinnerman"}}
        });
        let text = build_icy_string(
            &rules(
                "StreamTitle='{artist} - {title}';",
                &["now.song.artist", "now.song.name"],
            ),
            &document,
        );
        assert_eq!(text, "StreamTitle='Nina Simone - Sinnerman';");
    }

    #[test]
    fn missed_path_falls_back_to_top_level_key() {
        let document = json!({"artist": "Ibrahim Maalouf", "title": "Red & Black Light"});
        let text = build_icy_string(
            &rules(
                "StreamTitle='{artist} - {title}';",
                &["now.wrong.path"],
            ),
            &document,
        );
        assert_eq!(text, "StreamTitle='Ibrahim Maalouf - Red & Black Light';");
    }

    #[test]
    fn surplus_paths_are_ignored() {
        let document = json!({"artist": "A", "title": "B"});
        let text = build_icy_string(
            &rules(
                "StreamTitle='{artist} - {title}';",
                &["artist", "title", "ignored.extra"],
            ),
            &document,
        );
        assert_eq!(text, "StreamTitle='A - B';");
    }

    #[test]
    fn strips_quotes_inside_values() {
        let document = json!({"artist": "Guns N' Roses", "title": "Sweet Child O' Mine"});
        let text = build_icy_string(
            &rules("StreamTitle='{artist} - {title}';", &[]),
            &document,
        );
        assert_eq!(text, "StreamTitle='Guns N Roses - Sweet Child O Mine';");
    }

    #[test]
    fn collapses_whitespace_runs() {
        let document = json!({"artist": "  Spaced \t Out ", "title": "Tabs\n\nEverywhere"});
        let text = build_icy_string(
            &rules("StreamTitle='{artist} - {title}';", &[]),
            &document,
        );
        assert_eq!(text, "StreamTitle=' Spaced Out - Tabs Everywhere';");
    }

    #[test]
    fn arbitrary_tokens_are_supported() {
        let document = json!({
            "artist": "A",
            "title": "B",
            "cover": "http://img/c.jpg"
        });
        let text = build_icy_string(
            &rules("StreamTitle='{artist} - {title}';Artwork='{cover}';", &[]),
            &document,
        );
        assert_eq!(text, "StreamTitle='A - B';Artwork='http://img/c.jpg';");
    }

    #[test]
    fn non_string_values_substitute_empty() {
        let document = json!({"artist": 42, "title": ["x"]});
        let text = build_icy_string(
            &rules("StreamTitle='{artist} - {title}';", &[]),
            &document,
        );
        assert_eq!(text, "StreamTitle=' - ';");
    }

    #[tokio::test]
    async fn fetch_renders_remote_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/now"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "artist": "Khruangbin",
                "title": "Maria Tambien"
            })))
            .mount(&server)
            .await;

        let fetcher = MetadataFetcher::new(
            format!("{}/now", server.uri()),
            Duration::from_secs(2),
            rules("StreamTitle='{artist} - {title}';", &[]),
        )
        .unwrap();

        let text = fetcher.fetch().await.unwrap();
        assert_eq!(text, "StreamTitle='Khruangbin - Maria Tambien';");
    }

    #[tokio::test]
    async fn fetch_propagates_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/now"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = MetadataFetcher::new(
            format!("{}/now", server.uri()),
            Duration::from_secs(2),
            rules("StreamTitle='{artist}';", &[]),
        )
        .unwrap();

        match fetcher.fetch().await {
            Err(Error::UpstreamStatus(500)) => {}
            other => panic!("expected UpstreamStatus(500), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_rejects_invalid_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/now"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let fetcher = MetadataFetcher::new(
            format!("{}/now", server.uri()),
            Duration::from_secs(2),
            rules("StreamTitle='{artist}';", &[]),
        )
        .unwrap();

        assert!(matches!(fetcher.fetch().await, Err(Error::Json(_))));
    }
}

//! arXiv search for candidate papers.
//!
//! Queries the arXiv export API (`search_query=all:<topic>`) and turns the
//! Atom response into [`Document`]s for the evaluator. This is the only
//! network-facing retrieval in PaperScout; evaluation happens elsewhere.

mod parser;

use paperscout_shared::{Document, PaperScoutError, Result, SearchConfig};
use reqwest::Client;
use tracing::{info, instrument};
use url::Url;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

/// Maximum response size we accept (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("PaperScout/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for arXiv queries.
#[derive(Debug, Clone)]
pub struct ArxivOptions {
    /// Export API endpoint.
    pub endpoint: String,
    /// Maximum number of entries requested.
    pub max_results: u32,
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
}

impl Default for ArxivOptions {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for ArxivOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            max_results: config.max_results,
            timeout_secs: config.timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin client over the arXiv export API.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    client: Client,
    options: ArxivOptions,
}

impl ArxivClient {
    pub fn new(options: ArxivOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(std::time::Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| PaperScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, options })
    }

    /// Search for papers matching `topic`, in arXiv's relevance order.
    #[instrument(skip_all, fields(topic = %topic))]
    pub async fn search(&self, topic: &str) -> Result<Vec<Document>> {
        let url = self.query_url(topic)?;
        info!(%url, "querying arXiv");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| PaperScoutError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaperScoutError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(PaperScoutError::validation(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| PaperScoutError::Network(format!("{url}: failed to read body: {e}")))?;

        let documents = parser::parse_feed(&body)?;
        info!(count = documents.len(), "arXiv search complete");
        Ok(documents)
    }

    /// Build the query URL for `topic`.
    fn query_url(&self, topic: &str) -> Result<Url> {
        let max_results = self.options.max_results.to_string();
        Url::parse_with_params(
            &self.options.endpoint,
            &[
                ("search_query", format!("all:{}", topic.trim())),
                ("start", "0".to_string()),
                ("max_results", max_results),
            ],
        )
        .map_err(|e| {
            PaperScoutError::config(format!(
                "invalid search endpoint '{}': {e}",
                self.options.endpoint
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options_for(server: &MockServer) -> ArxivOptions {
        ArxivOptions {
            endpoint: format!("{}/api/query", server.uri()),
            max_results: 5,
            timeout_secs: 5,
        }
    }

    #[test]
    fn query_url_encodes_topic() {
        let client = ArxivClient::new(ArxivOptions::default()).unwrap();
        let url = client.query_url("state space models").unwrap();
        assert!(url.as_str().starts_with("http://export.arxiv.org/api/query?"));
        assert!(url.as_str().contains("search_query=all%3Astate+space+models"));
        assert!(url.as_str().contains("max_results=10"));
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let client = ArxivClient::new(ArxivOptions {
            endpoint: "not a url".into(),
            ..ArxivOptions::default()
        })
        .unwrap();
        assert!(matches!(
            client.query_url("x"),
            Err(PaperScoutError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn search_with_mock_server() {
        let server = MockServer::start().await;
        let feed = std::fs::read_to_string("../../../fixtures/arxiv/feed.xml")
            .expect("read feed fixture");

        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("search_query", "all:state space models"))
            .and(query_param("max_results", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed))
            .mount(&server)
            .await;

        let client = ArxivClient::new(options_for(&server)).unwrap();
        let docs = client.search("state space models").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "2312.00752v2");
    }

    #[tokio::test]
    async fn search_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ArxivClient::new(options_for(&server)).unwrap();
        let err = client.search("anything").await.unwrap_err();
        assert!(matches!(err, PaperScoutError::Network(_)));
        assert!(err.to_string().contains("503"));
    }
}

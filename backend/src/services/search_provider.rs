use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use searchhub_models::Source;
use serde::Deserialize;

/// How many sources ground a single answer.
pub const REFERENCE_COUNT: usize = 8;

const SERPER_SEARCH_ENDPOINT: &str = "https://google.serper.dev/search";

/// Web retrieval: query text in, ranked results out. Failures surface as a
/// generic error the orchestrator treats as "no sources".
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Source>>;
}

pub struct SerperClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

/// Serper's response is loosely shaped; everything is validated into
/// `Source` once, here at the retrieval boundary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic: Vec<OrganicHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeGraph {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description_url: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

impl SerperClient {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, SERPER_SEARCH_ENDPOINT.to_string())
    }

    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint,
        }
    }

    fn collect_sources(body: SerperResponse) -> Vec<Source> {
        let mut sources = Vec::new();

        // Knowledge graph and answer box outrank organic hits.
        if let Some(kg) = body.knowledge_graph {
            let url = kg.description_url.or(kg.website);
            if let (Some(url), Some(snippet)) = (url, kg.description) {
                sources.push(Source::new(kg.title.unwrap_or_default(), url, snippet));
            }
        }
        if let Some(answer_box) = body.answer_box {
            let snippet = answer_box.snippet.or(answer_box.answer);
            if let (Some(url), Some(snippet)) = (answer_box.url, snippet) {
                sources.push(Source::new(answer_box.title.unwrap_or_default(), url, snippet));
            }
        }
        for hit in body.organic {
            if sources.len() >= REFERENCE_COUNT {
                break;
            }
            if let (Some(title), Some(link)) = (hit.title, hit.link) {
                sources.push(Source::new(title, link, hit.snippet.unwrap_or_default()));
            }
        }

        sources.truncate(REFERENCE_COUNT);
        sources
    }
}

#[async_trait]
impl SearchProvider for SerperClient {
    async fn search(&self, query: &str) -> Result<Vec<Source>> {
        // Serper paginates by tens; over-fetch to the next multiple.
        let num = REFERENCE_COUNT.div_ceil(10) * 10;
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": num }))
            .send()
            .await
            .context("search provider request failed")?;

        if !response.status().is_success() {
            bail!("search provider returned status {}", response.status());
        }

        let body: SerperResponse = response
            .json()
            .await
            .context("search provider returned unparseable body")?;
        Ok(Self::collect_sources(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knowledge_graph_and_answer_box_rank_first() {
        let body: SerperResponse = serde_json::from_value(serde_json::json!({
            "knowledgeGraph": {
                "title": "Rust",
                "website": "https://rust-lang.org",
                "description": "A systems programming language."
            },
            "answerBox": {
                "title": "Rust release",
                "url": "https://blog.rust-lang.org",
                "answer": "Rust 1.0 shipped in 2015."
            },
            "organic": [
                { "title": "Hit", "link": "https://example.com", "snippet": "snippet" }
            ]
        }))
        .unwrap();

        let sources = SerperClient::collect_sources(body);
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].url, "https://rust-lang.org");
        assert_eq!(sources[1].snippet, "Rust 1.0 shipped in 2015.");
        assert_eq!(sources[2].name, "Hit");
    }

    #[test]
    fn test_results_capped_at_reference_count() {
        let organic: Vec<_> = (0..20)
            .map(|i| {
                serde_json::json!({
                    "title": format!("hit {i}"),
                    "link": format!("https://example.com/{i}"),
                    "snippet": "s"
                })
            })
            .collect();
        let body: SerperResponse =
            serde_json::from_value(serde_json::json!({ "organic": organic })).unwrap();
        assert_eq!(SerperClient::collect_sources(body).len(), REFERENCE_COUNT);
    }

    #[test]
    fn test_incomplete_hits_are_dropped() {
        let body: SerperResponse = serde_json::from_value(serde_json::json!({
            "organic": [
                { "title": "no link" },
                { "link": "https://example.com", "snippet": "no title" },
                { "title": "ok", "link": "https://ok.example" }
            ]
        }))
        .unwrap();
        let sources = SerperClient::collect_sources(body);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "ok");
        assert_eq!(sources[0].snippet, "");
    }
}

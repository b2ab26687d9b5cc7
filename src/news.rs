use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::models::NewsArticle;

const NEWSAPI_URL: &str = "https://newsapi.org/v2/everything";
const FINNHUB_URL: &str = "https://finnhub.io/api/v1/company-news";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const HQ_DOMAINS: &[&str] = &[
    "bloomberg.com",
    "ft.com",
    "wsj.com",
    "cnbc.com",
    "reuters.com",
    "markets.ft.com",
    "marketwatch.com",
];

static TICKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9.\-]{1,6}$").unwrap());

#[derive(Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Deserialize)]
struct NewsApiArticle {
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    source: NewsApiSource,
}

#[derive(Deserialize, Default)]
struct NewsApiSource {
    name: Option<String>,
}

#[derive(Deserialize)]
struct FinnhubArticle {
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

/// Headline retrieval over NewsAPI with a Finnhub company-news fallback.
/// A missing API key simply means that source contributes nothing; every
/// fetch error degrades to an empty list.
pub struct NewsClient {
    http: reqwest::Client,
    news_api_key: Option<String>,
    finnhub_key: Option<String>,
}

impl NewsClient {
    pub fn new(news_api_key: Option<String>, finnhub_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            news_api_key,
            finnhub_key,
        }
    }

    pub async fn news_for_symbol(
        &self,
        symbol: &str,
        company: &str,
        max_items: usize,
    ) -> Vec<NewsArticle> {
        let hq_domains = HQ_DOMAINS.join(",");
        let mut articles = self
            .fetch_newsapi(symbol, company, max_items, Some(&hq_domains))
            .await;
        if articles.len() >= max_items {
            articles.truncate(max_items);
            return articles;
        }

        let needed = max_items - articles.len();
        let loose = self.fetch_newsapi(symbol, company, needed, None).await;
        articles = fill_to(articles, loose, max_items);
        if articles.len() >= max_items {
            return articles;
        }

        if TICKER_RE.is_match(symbol) {
            let fallback = self
                .fetch_finnhub(symbol, 7, max_items - articles.len())
                .await;
            articles = fill_to(articles, fallback, max_items);
        }
        articles
    }

    async fn fetch_newsapi(
        &self,
        symbol: &str,
        company: &str,
        max_items: usize,
        domains: Option<&str>,
    ) -> Vec<NewsArticle> {
        let Some(key) = &self.news_api_key else {
            return Vec::new();
        };

        let mut params = vec![
            ("apiKey", key.clone()),
            ("qInTitle", format!("{} OR \"{}\"", symbol, company)),
            ("pageSize", max_items.to_string()),
            ("language", "en".to_string()),
            ("sortBy", "publishedAt".to_string()),
        ];
        if let Some(domains) = domains {
            params.push(("domains", domains.to_string()));
        }

        let response = match self
            .http
            .get(NEWSAPI_URL)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response,
            Err(e) => {
                warn!("newsapi request for {:?} failed: {}", symbol, e);
                return Vec::new();
            }
        };

        let body: NewsApiResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("newsapi response for {:?} unreadable: {}", symbol, e);
                return Vec::new();
            }
        };

        body.articles
            .into_iter()
            .take(max_items)
            .map(|a| NewsArticle {
                title: a.title.unwrap_or_else(|| "No headline".to_string()),
                url: a.url.unwrap_or_default(),
                source: a.source.name.unwrap_or_default(),
            })
            .collect()
    }

    async fn fetch_finnhub(&self, symbol: &str, days: i64, max_items: usize) -> Vec<NewsArticle> {
        let Some(key) = &self.finnhub_key else {
            return Vec::new();
        };

        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days(days);
        let params = [
            ("symbol", symbol.to_string()),
            ("from", from.to_string()),
            ("to", today.to_string()),
            ("token", key.clone()),
        ];

        let response = match self
            .http
            .get(FINNHUB_URL)
            .query(&params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response,
            Err(e) => {
                warn!("finnhub request for {:?} failed: {}", symbol, e);
                return Vec::new();
            }
        };

        let body: Vec<FinnhubArticle> = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("finnhub response for {:?} unreadable: {}", symbol, e);
                return Vec::new();
            }
        };

        body.into_iter()
            .take(max_items)
            .map(|a| NewsArticle {
                title: a.headline.unwrap_or_else(|| "No headline".to_string()),
                url: a.url.unwrap_or_default(),
                source: a.source.unwrap_or_else(|| "Finnhub".to_string()),
            })
            .collect()
    }
}

fn fill_to(
    mut base: Vec<NewsArticle>,
    extra: Vec<NewsArticle>,
    max_items: usize,
) -> Vec<NewsArticle> {
    base.extend(extra);
    base.truncate(max_items);
    base
}

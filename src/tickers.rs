use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::completion::TextCompletion;

const SEARCH_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

pub const MAX_SEARCH_ATTEMPTS: u32 = 3;
pub const INITIAL_BACKOFF_SECS: u64 = 1;
pub const MAX_BACKOFF_SECS: u64 = 60;

const TICKER_SYSTEM_PROMPT: &str = "You are a financial data assistant.";
const TICKER_ANSWER_TOKENS: u32 = 5;

/// Large-cap reference universe used to fill blank ticker slots.
pub const REFERENCE_UNIVERSE: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "META", "TSLA", "AVGO", "BRK-B", "LLY",
    "JPM", "V", "XOM", "UNH", "MA", "PG", "COST", "HD", "JNJ", "ORCL",
    "MRK", "ABBV", "CVX", "KO", "BAC", "CRM", "PEP", "NFLX", "AMD", "TMO",
    "WMT", "ADBE", "LIN", "MCD", "CSCO", "ACN", "ABT", "INTU", "QCOM", "DIS",
    "WFC", "CAT", "GE", "IBM", "TXN", "VZ", "AMGN", "PFE", "DHR", "NOW",
    "PM", "NEE", "CMCSA", "UNP", "SPGI", "RTX", "LOW", "HON", "COP", "T",
    "UPS", "AXP", "BLK", "ISRG", "GS", "ETN", "BKNG", "ELV", "SYK", "MS",
    "LMT", "TJX", "MDT", "PGR", "VRTX", "BA", "C", "MMC", "DE", "CB",
    "REGN", "ADP", "PLD", "CI", "GILD", "AMT", "SBUX", "MDLZ", "BMY", "SO",
    "ZTS", "MO", "ADI", "DUK", "SCHW", "BSX", "INTC", "FI", "SHW", "BDX",
];

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("symbol search rate limited")]
    RateLimited,
    #[error("symbol search failed: {0}")]
    Failed(String),
}

/// One candidate security from the symbol-search service.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuote {
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "quoteType", default)]
    pub quote_type: String,
    #[serde(default)]
    pub shortname: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

/// Free-text symbol search, returning candidate securities. The rate-limit
/// condition is surfaced separately so callers can back off and retry.
#[async_trait]
pub trait SymbolSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchQuote>, SearchError>;
}

/// Injectable sleep so the backoff loop can be exercised without real delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Symbol search against the Yahoo Finance search endpoint.
pub struct YahooSearchClient {
    http: reqwest::Client,
}

impl YahooSearchClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for YahooSearchClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SymbolSearch for YahooSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchQuote>, SearchError> {
        let response = self
            .http
            .get(SEARCH_URL)
            .query(&[("q", query)])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| SearchError::Failed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(SearchError::Failed(format!("status {}", response.status())));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Failed(e.to_string()))?;
        Ok(body.quotes)
    }
}

/// Normalizes free-form company/ticker text into a canonical ticker symbol.
///
/// Three stages, each consulted only if the previous one came up empty:
/// symbol search (with rate-limit backoff), a factual question to the
/// completion service, and finally the uppercased raw input. Expected failure
/// modes never surface to the caller; resolution always produces a symbol for
/// non-empty input.
pub struct TickerResolver {
    search: Arc<dyn SymbolSearch>,
    completion: Arc<dyn TextCompletion>,
    sleeper: Arc<dyn Sleeper>,
}

impl TickerResolver {
    pub fn new(search: Arc<dyn SymbolSearch>, completion: Arc<dyn TextCompletion>) -> Self {
        Self {
            search,
            completion,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub async fn resolve(&self, input: &str) -> String {
        let query = input.trim();
        if query.is_empty() {
            return String::new();
        }

        if let Some(symbol) = self.search_equity(query).await {
            return symbol;
        }
        if let Some(symbol) = self.ask_model(query).await {
            return symbol;
        }
        query.to_uppercase()
    }

    /// Stage 1: symbol search, retried with exponential backoff only on the
    /// explicit rate-limit signal. Any other failure counts as zero results.
    async fn search_equity(&self, query: &str) -> Option<String> {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;
        let mut attempts = 0u32;

        let equities = loop {
            attempts += 1;
            match self.search.search(query).await {
                Ok(quotes) => {
                    break quotes
                        .into_iter()
                        .filter(|q| q.quote_type == "EQUITY" && !q.symbol.is_empty())
                        .collect::<Vec<_>>();
                }
                Err(SearchError::RateLimited) => {
                    if attempts >= MAX_SEARCH_ATTEMPTS {
                        warn!(
                            "symbol search for {:?} still rate limited after {} attempts",
                            query, attempts
                        );
                        break Vec::new();
                    }
                    debug!(
                        "symbol search for {:?} rate limited, retrying in {}s",
                        query, backoff_secs
                    );
                    self.sleeper.sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = next_backoff(backoff_secs);
                }
                Err(SearchError::Failed(reason)) => {
                    warn!("symbol search for {:?} failed: {}", query, reason);
                    break Vec::new();
                }
            }
        };

        // Dotted symbols are usually secondary share classes or foreign listings.
        if let Some(quote) = equities.iter().find(|q| !q.symbol.contains('.')) {
            return Some(quote.symbol.to_uppercase());
        }
        equities.first().map(|q| q.symbol.to_uppercase())
    }

    /// Stage 2: ask the completion service, accepting only a bare-symbol answer.
    async fn ask_model(&self, name: &str) -> Option<String> {
        let question = format!(
            "What is the primary U.S. stock ticker for the company \"{}\"? \
             Reply with the ticker symbol only, e.g. AAPL.",
            name
        );
        let answer = match self
            .completion
            .complete(TICKER_SYSTEM_PROMPT, &question, TICKER_ANSWER_TOKENS, 0.0)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("ticker lookup for {:?} via completion failed: {:#}", name, e);
                return None;
            }
        };

        let candidate = answer.trim().to_uppercase();
        if looks_like_ticker(&candidate) {
            Some(candidate)
        } else {
            debug!("completion answer {:?} is not a bare ticker", answer);
            None
        }
    }
}

fn next_backoff(current_secs: u64) -> u64 {
    (current_secs * 2).min(MAX_BACKOFF_SECS)
}

/// 1-5 letters, nothing else.
fn looks_like_ticker(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate.len() <= 5
        && candidate.chars().all(|c| c.is_ascii_alphabetic())
}

/// Fill only the blank slots with distinct symbols from the reference
/// universe; filled slots and ordering stay untouched.
pub fn fill_random_tickers(mut tickers: Vec<String>) -> Vec<String> {
    let empties: Vec<usize> = tickers
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_empty())
        .map(|(i, _)| i)
        .collect();
    if empties.is_empty() {
        return tickers;
    }

    let mut rng = rand::rng();
    let picks: Vec<&str> = REFERENCE_UNIVERSE
        .choose_multiple(&mut rng, empties.len())
        .copied()
        .collect();
    for (slot, pick) in empties.into_iter().zip(picks) {
        tickers[slot] = pick.to_string();
    }
    tickers
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn equity(symbol: &str) -> SearchQuote {
        SearchQuote {
            symbol: symbol.to_string(),
            quote_type: "EQUITY".to_string(),
            shortname: None,
        }
    }

    fn quote(symbol: &str, quote_type: &str) -> SearchQuote {
        SearchQuote {
            symbol: symbol.to_string(),
            quote_type: quote_type.to_string(),
            shortname: None,
        }
    }

    struct ScriptedSearch {
        responses: Mutex<VecDeque<Result<Vec<SearchQuote>, SearchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSearch {
        fn new(responses: Vec<Result<Vec<SearchQuote>, SearchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SymbolSearch for ScriptedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchQuote>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SearchError::Failed("script exhausted".to_string())))
        }
    }

    enum Scripted {
        Reply(String),
        Fail,
    }

    struct ScriptedCompletion {
        script: Scripted,
        calls: AtomicUsize,
    }

    impl ScriptedCompletion {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                script: Scripted::Reply(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                script: Scripted::Fail,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextCompletion for ScriptedCompletion {
        async fn complete(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Scripted::Reply(text) => Ok(text.clone()),
                Scripted::Fail => Err(anyhow!("completion unavailable")),
            }
        }
    }

    struct RecordingSleeper {
        naps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                naps: Mutex::new(Vec::new()),
            })
        }

        fn naps(&self) -> Vec<Duration> {
            self.naps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.naps.lock().unwrap().push(duration);
        }
    }

    fn resolver(
        search: &Arc<ScriptedSearch>,
        completion: &Arc<ScriptedCompletion>,
        sleeper: &Arc<RecordingSleeper>,
    ) -> TickerResolver {
        TickerResolver::new(search.clone(), completion.clone())
            .with_sleeper(sleeper.clone())
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_lookups() {
        let search = ScriptedSearch::new(vec![]);
        let completion = ScriptedCompletion::replying("AAPL");
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("").await, "");
        assert_eq!(resolver.resolve("   ").await, "");
        assert_eq!(search.calls(), 0);
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn prefers_first_dot_free_equity() {
        let search = ScriptedSearch::new(vec![Ok(vec![equity("BRK.B"), equity("AAPL")])]);
        let completion = ScriptedCompletion::failing();
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("berkshire").await, "AAPL");
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_first_equity_when_all_dotted() {
        let search = ScriptedSearch::new(vec![Ok(vec![equity("BRK.B")])]);
        let completion = ScriptedCompletion::failing();
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("berkshire b").await, "BRK.B");
    }

    #[tokio::test]
    async fn non_equity_candidates_are_ignored() {
        let search = ScriptedSearch::new(vec![Ok(vec![
            quote("ES=F", "FUTURE"),
            quote("^GSPC", "INDEX"),
        ])]);
        let completion = ScriptedCompletion::failing();
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        // No equities and no usable completion answer: raw input, uppercased.
        assert_eq!(resolver.resolve("sp500 futures").await, "SP500 FUTURES");
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn completion_answer_is_uppercased_and_returned() {
        let search = ScriptedSearch::new(vec![Ok(vec![])]);
        let completion = ScriptedCompletion::replying("aapl");
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("apple").await, "AAPL");
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn multi_word_completion_answer_falls_through_to_raw() {
        let search = ScriptedSearch::new(vec![Ok(vec![])]);
        let completion = ScriptedCompletion::replying("Apple Inc");
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("apple").await, "APPLE");
    }

    #[tokio::test]
    async fn completion_error_falls_through_to_raw() {
        let search = ScriptedSearch::new(vec![Ok(vec![])]);
        let completion = ScriptedCompletion::failing();
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("tesla inc").await, "TESLA INC");
    }

    #[tokio::test]
    async fn rate_limits_exhaust_after_three_attempts_with_two_backoffs() {
        let search = ScriptedSearch::new(vec![
            Err(SearchError::RateLimited),
            Err(SearchError::RateLimited),
            Err(SearchError::RateLimited),
        ]);
        let completion = ScriptedCompletion::replying("MSFT");
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("microsoft").await, "MSFT");
        assert_eq!(search.calls(), 3);
        assert_eq!(
            sleeper.naps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn retry_after_rate_limit_uses_fresh_response() {
        let search = ScriptedSearch::new(vec![
            Err(SearchError::RateLimited),
            Ok(vec![equity("TSLA")]),
        ]);
        let completion = ScriptedCompletion::failing();
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("tesla").await, "TSLA");
        assert_eq!(search.calls(), 2);
        assert_eq!(sleeper.naps(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn non_rate_limit_failure_is_not_retried() {
        let search = ScriptedSearch::new(vec![Err(SearchError::Failed(
            "connection refused".to_string(),
        ))]);
        let completion = ScriptedCompletion::replying("NFLX");
        let sleeper = RecordingSleeper::new();
        let resolver = resolver(&search, &completion, &sleeper);

        assert_eq!(resolver.resolve("netflix").await, "NFLX");
        assert_eq!(search.calls(), 1);
        assert!(sleeper.naps().is_empty());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut secs = INITIAL_BACKOFF_SECS;
        let mut observed = vec![secs];
        for _ in 0..8 {
            secs = next_backoff(secs);
            observed.push(secs);
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn ticker_shape_validation() {
        assert!(looks_like_ticker("A"));
        assert!(looks_like_ticker("AAPL"));
        assert!(looks_like_ticker("GOOGL"));
        assert!(!looks_like_ticker(""));
        assert!(!looks_like_ticker("TOOLONG"));
        assert!(!looks_like_ticker("BRK.B"));
        assert!(!looks_like_ticker("APPLE INC"));
        assert!(!looks_like_ticker("C3"));
    }

    #[test]
    fn fill_leaves_non_empty_slots_untouched() {
        let filled = fill_random_tickers(vec![
            "AAPL".to_string(),
            String::new(),
            "MSFT".to_string(),
        ]);
        assert_eq!(filled[0], "AAPL");
        assert_eq!(filled[2], "MSFT");
        assert!(REFERENCE_UNIVERSE.contains(&filled[1].as_str()));
    }

    #[test]
    fn fill_without_empties_returns_input_unchanged() {
        let input = vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()];
        assert_eq!(fill_random_tickers(input.clone()), input);
    }

    #[test]
    fn fill_draws_distinct_symbols() {
        let filled = fill_random_tickers(vec![String::new(), String::new(), String::new()]);
        let unique: HashSet<&String> = filled.iter().collect();
        assert_eq!(unique.len(), 3);
        for symbol in &filled {
            assert!(REFERENCE_UNIVERSE.contains(&symbol.as_str()));
        }
    }
}

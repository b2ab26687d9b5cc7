use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Regions a subscriber can pick, each benchmarked against one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "Europe")]
    Europe,
    #[serde(rename = "UK")]
    Uk,
    #[serde(rename = "Asia")]
    Asia,
    #[serde(rename = "South America")]
    SouthAmerica,
    #[serde(rename = "Africa")]
    Africa,
    #[serde(rename = "Australia")]
    Australia,
}

impl Region {
    pub fn name(self) -> &'static str {
        match self {
            Region::Us => "US",
            Region::Europe => "Europe",
            Region::Uk => "UK",
            Region::Asia => "Asia",
            Region::SouthAmerica => "South America",
            Region::Africa => "Africa",
            Region::Australia => "Australia",
        }
    }

    pub fn index_symbol(self) -> &'static str {
        match self {
            Region::Us => "^GSPC",
            Region::Europe => "^STOXX50E",
            Region::Uk => "^FTSE",
            Region::Asia => "^N225",
            Region::SouthAmerica => "^SPLAC",
            Region::Africa => "^SPAFRUP",
            Region::Australia => "^XJO",
        }
    }

    pub fn index_display(self) -> &'static str {
        match self {
            Region::Us => "S&P 500",
            Region::Europe => "STOXX Europe 50",
            Region::Uk => "FTSE 100",
            Region::Asia => "Nikkei 225",
            Region::SouthAmerica => "S&P Latin America 40",
            Region::Africa => "S&P Africa BMI",
            Region::Australia => "ASX 200",
        }
    }
}

/// One-line price summary for a single stock, all values best-effort.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSummary {
    pub symbol: String,
    pub last_close: f64,
    pub day_pct: f64,
    pub ytd_pct: f64,
}

/// Latest and previous close of a benchmark index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexQuote {
    pub symbol: String,
    pub last_close: f64,
    pub prev_close: f64,
}

/// Company name plus analyst consensus, degraded to defaults when unavailable.
#[derive(Debug, Clone)]
pub struct StockProfile {
    pub company: String,
    pub analyst_rec: String,
    pub target: f64,
}

#[derive(Debug, Clone)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    pub source: String,
}

/// One digest send, as submitted by the form.
#[derive(Debug, Clone, Deserialize)]
pub struct DigestRequest {
    pub name: String,
    pub region: Region,
    pub tickers: Vec<String>,
    pub email: String,
}

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap()
});

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

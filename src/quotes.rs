use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::warn;
use yfinance_rs::{Interval, Range, Ticker, YfClient};

use crate::models::{IndexQuote, PriceSummary, Region, StockProfile};

pub struct QuoteFetcher {
    client: YfClient,
}

impl QuoteFetcher {
    pub fn new() -> Self {
        Self {
            client: YfClient::default(),
        }
    }

    /// Daily close series for a symbol over the given range. Bars whose close
    /// cannot be parsed are skipped.
    pub(crate) async fn daily_closes(
        &self,
        symbol: &str,
        range: Range,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let ticker = Ticker::new(&self.client, symbol);
        let history = ticker
            .history(Some(range), Some(Interval::D1), false)
            .await
            .map_err(|e| anyhow!("failed to fetch history for {}: {:?}", symbol, e))?;

        let mut closes = Vec::with_capacity(history.len());
        for bar in &history {
            if let Some(close) = parse_money(&bar.close.to_string()).and_then(|d| d.to_f64()) {
                closes.push((bar.ts.date_naive(), close));
            }
        }
        Ok(closes)
    }

    /// Last close plus 1-day and YTD percentage moves over the past year.
    /// Fetch failures degrade to a zeroed summary.
    pub async fn get_stock_quote(&self, symbol: &str) -> PriceSummary {
        let closes = match self.daily_closes(symbol, Range::Y1).await {
            Ok(closes) => closes,
            Err(e) => {
                warn!("quote for {} unavailable: {:#}", symbol, e);
                Vec::new()
            }
        };
        summarize_closes(symbol, &closes, Utc::now().date_naive())
    }

    pub async fn fetch_index(&self, region: Region) -> IndexQuote {
        let symbol = region.index_symbol();
        let closes = match self.daily_closes(symbol, Range::D5).await {
            Ok(closes) => closes,
            Err(e) => {
                warn!("index quote for {} unavailable: {:#}", symbol, e);
                Vec::new()
            }
        };
        index_from_closes(symbol, &closes)
    }

    /// Company name and analyst consensus. Every piece degrades independently.
    pub async fn get_stock_profile(&self, symbol: &str) -> StockProfile {
        let ticker = Ticker::new(&self.client, symbol);

        let company = match ticker.quote().await {
            Ok(quote) => quote.shortname.unwrap_or_else(|| symbol.to_string()),
            Err(e) => {
                warn!("profile for {} unavailable: {:?}", symbol, e);
                symbol.to_string()
            }
        };

        let analyst_rec = match ticker.recommendations_summary().await {
            Ok(summary) => summary
                .mean_rating_text
                .or_else(|| summary.mean.map(rating_label))
                .unwrap_or_else(|| "n/a".to_string()),
            Err(_) => "n/a".to_string(),
        };

        let target = match ticker.analyst_price_target(None).await {
            Ok(target) => target
                .mean
                .and_then(|m| parse_money(&m.to_string()))
                .and_then(|d| d.to_f64())
                .unwrap_or(0.0),
            Err(_) => 0.0,
        };

        StockProfile {
            company,
            analyst_rec,
            target,
        }
    }
}

impl Default for QuoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Money values render as e.g. "189.46 USD"; strip everything but the number.
pub(crate) fn parse_money(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(&cleaned).ok()
}

/// Map a numeric consensus mean (1 strong buy .. 5 strong sell) to a label.
fn rating_label(mean: f64) -> String {
    let label = if mean < 1.5 {
        "Strong Buy"
    } else if mean < 2.5 {
        "Buy"
    } else if mean < 3.5 {
        "Hold"
    } else if mean < 4.5 {
        "Sell"
    } else {
        "Strong Sell"
    };
    label.to_string()
}

pub(crate) fn summarize_closes(
    symbol: &str,
    closes: &[(NaiveDate, f64)],
    today: NaiveDate,
) -> PriceSummary {
    match closes {
        [] => PriceSummary {
            symbol: symbol.to_string(),
            last_close: 0.0,
            day_pct: 0.0,
            ytd_pct: 0.0,
        },
        [(_, only)] => PriceSummary {
            symbol: symbol.to_string(),
            last_close: *only,
            day_pct: 0.0,
            ytd_pct: 0.0,
        },
        _ => {
            let last = closes[closes.len() - 1].1;
            let prev = closes[closes.len() - 2].1;
            let day_pct = if prev != 0.0 {
                (last - prev) / prev * 100.0
            } else {
                0.0
            };

            let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap();
            let ytd_pct = closes
                .iter()
                .find(|(date, _)| *date >= year_start)
                .map(|(_, base)| {
                    if *base != 0.0 {
                        (last - base) / base * 100.0
                    } else {
                        0.0
                    }
                })
                .unwrap_or(0.0);

            PriceSummary {
                symbol: symbol.to_string(),
                last_close: last,
                day_pct,
                ytd_pct,
            }
        }
    }
}

pub(crate) fn index_from_closes(symbol: &str, closes: &[(NaiveDate, f64)]) -> IndexQuote {
    let (last_close, prev_close) = match closes {
        [] => (0.0, 0.0),
        [(_, only)] => (*only, *only),
        _ => (closes[closes.len() - 1].1, closes[closes.len() - 2].1),
    };
    IndexQuote {
        symbol: symbol.to_string(),
        last_close,
        prev_close,
    }
}

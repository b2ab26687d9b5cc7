use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use askama::Template;
use chrono::Utc;
use tracing::{info, warn};

use crate::charts::performance_charts;
use crate::completion::TextCompletion;
use crate::email::{InlineImage, Mailer};
use crate::models::{DigestRequest, IndexQuote, NewsArticle, PriceSummary, Region, StockProfile};
use crate::news::NewsClient;
use crate::quotes::QuoteFetcher;
use crate::tickers::{TickerResolver, fill_random_tickers};

const COMMENTARY_SYSTEM_PROMPT: &str = "You are an investor-focused financial journalist.";
const BLURB_SYSTEM_PROMPT: &str = "You are a clear and succinct equity analyst.";

const GAIN_COLOR: &str = "#008000";
const LOSS_COLOR: &str = "#D00000";

#[derive(Debug)]
pub struct PctCell {
    pub text: String,
    pub color: &'static str,
}

#[derive(Debug)]
pub struct PerfRow {
    pub company: String,
    pub symbol: String,
    pub last_close: String,
    pub day: PctCell,
    pub ytd: PctCell,
}

pub struct ChartRef {
    pub title: String,
    pub cid: String,
}

pub struct StockSection {
    pub symbol: String,
    pub company: String,
    pub blurb: String,
}

#[derive(Template)]
#[template(path = "digest.html")]
struct DigestTemplate {
    name: String,
    intro_global: Option<String>,
    intro_region: Option<String>,
    rows: Vec<PerfRow>,
    charts: Vec<ChartRef>,
    weekly: Vec<NewsArticle>,
    roundup: Vec<NewsArticle>,
    sections: Vec<StockSection>,
}

struct StockEntry {
    summary: PriceSummary,
    profile: StockProfile,
}

/// Builds one digest end to end and hands it to the mailer. Everything but
/// the final SMTP send degrades per item rather than failing the request.
pub struct DigestService {
    resolver: Arc<TickerResolver>,
    quotes: QuoteFetcher,
    news: NewsClient,
    completion: Arc<dyn TextCompletion>,
    mailer: Mailer,
}

impl DigestService {
    pub fn new(
        resolver: Arc<TickerResolver>,
        quotes: QuoteFetcher,
        news: NewsClient,
        completion: Arc<dyn TextCompletion>,
        mailer: Mailer,
    ) -> Self {
        Self {
            resolver,
            quotes,
            news,
            completion,
            mailer,
        }
    }

    pub async fn build_and_send(&self, request: &DigestRequest) -> Result<()> {
        // 1. Normalize tickers and fill the blank slots.
        let mut tickers = Vec::with_capacity(request.tickers.len());
        for raw in &request.tickers {
            tickers.push(self.resolver.resolve(raw).await);
        }
        let tickers = fill_random_tickers(tickers);
        info!("building digest for {} with tickers {:?}", request.email, tickers);

        // 2. Quotes and analyst profiles per ticker.
        let mut stocks = Vec::with_capacity(tickers.len());
        for ticker in &tickers {
            let summary = self.quotes.get_stock_quote(ticker).await;
            let profile = self.quotes.get_stock_profile(ticker).await;
            stocks.push(StockEntry { summary, profile });
        }

        // 3. Regional benchmark index.
        let index = self.quotes.fetch_index(request.region).await;

        // 4. Market commentary.
        let intro_global = self.global_commentary().await;
        let intro_region = self.regional_commentary(request.region).await;

        // 5. Performance table, index first.
        let rows = perf_rows(&index, request.region, &stocks);

        // 6. Charts across tickers plus the index.
        let mut chart_symbols = tickers.clone();
        chart_symbols.push(index.symbol.clone());
        let charts = performance_charts(&self.quotes, &chart_symbols).await?;

        // 7. Weekly top news.
        let weekly = self.news.news_for_symbol("world", "global economy", 5).await;

        // 8. Headline roundup, deduped by URL and title across all companies.
        let mut seen_urls = HashSet::new();
        let mut seen_titles = HashSet::new();
        let mut roundup = Vec::new();
        for stock in &stocks {
            let company = &stock.profile.company;
            let articles = self.news.news_for_symbol(company, company, 7).await;
            roundup.extend(dedupe_articles(articles, &mut seen_urls, &mut seen_titles));
        }

        // 9. Per-stock blurbs.
        let mut sections = Vec::new();
        for stock in &stocks {
            let company = &stock.profile.company;
            let recent = self.news.news_for_symbol(company, company, 7).await;
            if let Some(blurb) = self.stock_blurb(stock, &recent).await {
                sections.push(StockSection {
                    symbol: stock.summary.symbol.clone(),
                    company: company.clone(),
                    blurb,
                });
            }
        }

        // 10. Render and send.
        let plain = plain_text_summary(&request.name, &rows);
        let template = DigestTemplate {
            name: request.name.clone(),
            intro_global,
            intro_region,
            rows,
            charts: charts
                .iter()
                .map(|c| ChartRef {
                    title: chart_title(&c.label),
                    cid: c.cid.clone(),
                })
                .collect(),
            weekly,
            roundup,
            sections,
        };
        let html = template.render().context("failed to render digest template")?;

        let subject = format!("Financial Digest for {}", Utc::now().format("%B %d, %Y"));
        let images = charts
            .into_iter()
            .map(|c| InlineImage {
                cid: c.cid,
                png: c.png,
            })
            .collect();
        self.mailer
            .send_digest(&request.email, &subject, html, plain, images)
            .await
    }

    async fn global_commentary(&self) -> Option<String> {
        let headlines = self.news.news_for_symbol("world", "global economy", 5).await;
        let prompt = format!(
            "Here are five recent headlines about global politics and macroeconomics:\n\n{}\n\n\
             Summarize the current global political and macroeconomic environment in ~120 words \
             from an investor's perspective.\n\
             Focus on actually important news that have broad implications.\n\
             Give a 1 sentence recommendation at the end on what to do or keep your eyes on.",
            bullet_list(&headlines)
        );
        self.commentary(&prompt, 260).await
    }

    async fn regional_commentary(&self, region: Region) -> Option<String> {
        let query = format!("{} market economy", region.name());
        let headlines = self.news.news_for_symbol(region.name(), &query, 5).await;
        let prompt = format!(
            "Here are five recent market headlines specifically from or affecting the {region} \
             region:\n\n{}\n\n\
             Summarize the recent market developments and investment implications in {region} in \
             ~100 words.\n\
             Focus on actually important news that have broad implications for {region}.\n\
             Give a 1 sentence recommendation at the end on what to do or keep your eyes on.",
            bullet_list(&headlines),
            region = region.name()
        );
        self.commentary(&prompt, 220).await
    }

    async fn commentary(&self, prompt: &str, max_tokens: u32) -> Option<String> {
        match self
            .completion
            .complete(COMMENTARY_SYSTEM_PROMPT, prompt, max_tokens, 0.7)
            .await
        {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("commentary generation failed: {:#}", e);
                None
            }
        }
    }

    async fn stock_blurb(&self, stock: &StockEntry, news: &[NewsArticle]) -> Option<String> {
        let prompt = format!(
            "Here are recent headlines for {symbol} ({company}):\n\n{headlines}\n\n\
             Write a ~100-word investor update on {symbol}, including the consensus analyst \
             recommendation ({rec}) and average target price (${target:.2}).",
            symbol = stock.summary.symbol,
            company = stock.profile.company,
            headlines = bullet_list(news),
            rec = stock.profile.analyst_rec,
            target = stock.profile.target,
        );
        match self
            .completion
            .complete(BLURB_SYSTEM_PROMPT, &prompt, 250, 0.7)
            .await
        {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("blurb for {} failed: {:#}", stock.summary.symbol, e);
                None
            }
        }
    }
}

fn bullet_list(articles: &[NewsArticle]) -> String {
    articles
        .iter()
        .map(|a| format!("- {}", a.title))
        .collect::<Vec<_>>()
        .join("\n")
}

fn chart_title(label: &str) -> String {
    match label {
        "1M" => "1-Month Performance".to_string(),
        "1Y" => "1-Year Performance".to_string(),
        other => format!("{} Performance", other),
    }
}

pub(crate) fn dedupe_articles(
    articles: Vec<NewsArticle>,
    seen_urls: &mut HashSet<String>,
    seen_titles: &mut HashSet<String>,
) -> Vec<NewsArticle> {
    let mut kept = Vec::new();
    for article in articles {
        let url = article.url.trim().to_string();
        let title = article.title.trim().to_string();
        if seen_urls.contains(&url) || seen_titles.contains(&title) {
            continue;
        }
        seen_urls.insert(url);
        seen_titles.insert(title);
        kept.push(article);
    }
    kept
}

pub(crate) fn perf_rows(index: &IndexQuote, region: Region, stocks: &[StockEntry]) -> Vec<PerfRow> {
    let index_day = if index.prev_close != 0.0 {
        (index.last_close - index.prev_close) / index.prev_close * 100.0
    } else {
        0.0
    };

    let mut rows = vec![PerfRow {
        company: region.index_display().to_string(),
        symbol: index.symbol.clone(),
        last_close: format_amount(index.last_close),
        day: pct_cell(index_day),
        ytd: pct_cell(0.0),
    }];

    for stock in stocks {
        rows.push(PerfRow {
            company: stock.profile.company.clone(),
            symbol: stock.summary.symbol.clone(),
            last_close: format_amount(stock.summary.last_close),
            day: pct_cell(stock.summary.day_pct),
            ytd: pct_cell(stock.summary.ytd_pct),
        });
    }
    rows
}

pub(crate) fn pct_cell(pct: f64) -> PctCell {
    PctCell {
        text: format!("{:+.1}%", pct),
        color: if pct >= 0.0 { GAIN_COLOR } else { LOSS_COLOR },
    }
}

pub(crate) fn format_amount(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

fn plain_text_summary(name: &str, rows: &[PerfRow]) -> String {
    let mut text = format!(
        "Financial Digest\n\nGood morning, {}\n\nPerformance:\n",
        name
    );
    for row in rows {
        text.push_str(&format!(
            "  {} ({}): {} ({} 1D, {} YTD)\n",
            row.company, row.symbol, row.last_close, row.day.text, row.ytd.text
        ));
    }
    text.push_str("\nOpen the HTML version for charts, headlines, and commentary.\n");
    text
}

use anyhow::{anyhow, Result};
use clap::Parser;
use engine::index::{Index, Vocabulary};
use engine::persist::{self, IndexPaths, MetaFile, ARTIFACT_VERSION};
use engine::tokenizer::term_counts;
use reqwest::{header, Client};
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::time::sleep;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Sequentially crawl a wiki into the term-document checkpoint")]
struct Cli {
    /// Path to a file with seed URLs (one per line). Only consulted
    /// when the checkpoint has no persisted frontier.
    #[arg(long)]
    seeds: Option<String>,
    /// Checkpoint directory (index artifacts and frontier)
    #[arg(long, default_value = "./index")]
    checkpoint: String,
    /// Domain prefix; wiki-relative links are joined onto it
    #[arg(long, default_value = "https://simple.wikipedia.org")]
    domain: String,
    /// Path to a file with URLs never to fetch (one per line)
    #[arg(long)]
    skip: Option<String>,
    /// Maximum number of pages to fetch this run
    #[arg(long, default_value_t = 10_000)]
    max_pages: usize,
    /// Delay between fetches, in seconds
    #[arg(long, default_value_t = 0.75)]
    delay_secs: f64,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// Persist a checkpoint every this many fetched pages
    #[arg(long, default_value_t = 1000)]
    save_every: usize,
    /// User-Agent string
    #[arg(long, default_value = "lsi-search-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    let paths = IndexPaths::new(&args.checkpoint);

    // Resume from the checkpoint; anything missing starts empty.
    let terms = persist::load_vocabulary(&paths)?.unwrap_or_default();
    let locators = persist::load_documents(&paths)?.unwrap_or_default();
    let matrix = persist::load_matrix(&paths)?.unwrap_or_default();
    let mut index = Index::from_parts(Vocabulary::from_terms(terms), locators, matrix);

    let mut frontier: VecDeque<String> = persist::load_frontier(&paths)?
        .unwrap_or_default()
        .into();
    let mut found: HashSet<String> = index.documents().iter().cloned().collect();
    found.extend(frontier.iter().cloned());

    if frontier.is_empty() {
        let seeds_path = args
            .seeds
            .as_ref()
            .ok_or_else(|| anyhow!("no persisted frontier and no --seeds file"))?;
        for seed in read_lines(seeds_path)? {
            if found.insert(seed.clone()) {
                frontier.push_back(seed);
            }
        }
    }
    if let Some(skip_path) = &args.skip {
        // Marking a URL as found keeps it out of the frontier forever.
        found.extend(read_lines(skip_path)?);
    }
    if frontier.is_empty() {
        return Err(anyhow!("no URLs to crawl"));
    }

    tracing::info!(
        frontier = frontier.len(),
        docs = index.num_docs(),
        terms = index.num_terms(),
        max_pages = args.max_pages,
        "starting crawl"
    );

    let client = Client::builder()
        .user_agent(args.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;

    let sel_links = Selector::parse("a").unwrap();
    let sel_blocks = Selector::parse("p, h1, h2, h3, h4, h5, h6").unwrap();

    let mut fetched = 0usize;
    while fetched < args.max_pages {
        let Some(url) = frontier.pop_front() else { break };
        fetched += 1;

        match fetch_page(&client, &url).await {
            Ok(Some(body)) => {
                let counts = {
                    let page = Html::parse_document(&body);
                    for link in extract_links(&page, &sel_links, &args.domain) {
                        if found.insert(link.clone()) {
                            frontier.push_back(link);
                        }
                    }
                    // Category pages only feed the frontier.
                    if url.contains("Category:") {
                        HashMap::new()
                    } else {
                        let mut counts: HashMap<String, u32> = HashMap::new();
                        for block in extract_text_blocks(&page, &sel_blocks) {
                            for (term, count) in term_counts(&block) {
                                *counts.entry(term).or_insert(0) += count;
                            }
                        }
                        counts
                    }
                };
                match index.record(&url, &counts) {
                    Some(doc) => tracing::info!(%url, doc, terms = counts.len(), "indexed"),
                    None => tracing::debug!(%url, "no indexable terms"),
                }
            }
            Ok(None) => {} // non-success status, already logged
            Err(e) => tracing::warn!(%url, error = %e, "fetch failed"),
        }

        if fetched % args.save_every == 0 {
            save_checkpoint(&paths, &index, &frontier)?;
            tracing::info!(fetched, frontier = frontier.len(), "checkpoint saved");
        }
        sleep(Duration::from_secs_f64(args.delay_secs)).await;
    }

    save_checkpoint(&paths, &index, &frontier)?;
    tracing::info!(
        fetched,
        docs = index.num_docs(),
        terms = index.num_terms(),
        frontier = frontier.len(),
        "crawl finished"
    );
    Ok(())
}

fn read_lines(path: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for line in BufReader::new(File::open(path)?).lines() {
        let s = line?.trim().to_string();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        out.push(s);
    }
    Ok(out)
}

async fn fetch_page(client: &Client, url: &str) -> Result<Option<String>> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        tracing::warn!(%url, %status, "non-success response");
        return Ok(None);
    }
    if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
        if let Ok(v) = ct.to_str() {
            if !v.starts_with("text/html") {
                return Ok(None);
            }
        }
    }
    let bytes = resp.bytes().await?;
    if bytes.len() > 2 * 1024 * 1024 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
}

/// Candidate links: wiki-relative hrefs under the domain prefix.
/// `Special:` pages and colon-qualified titles are excluded, except
/// `Category:` pages, which are kept as link hubs.
fn extract_links(page: &Html, sel: &Selector, domain: &str) -> HashSet<String> {
    let mut links = HashSet::new();
    for a in page.select(sel) {
        let Some(href) = a.value().attr("href") else { continue };
        if !href.starts_with("/wiki/") || href.contains("Special:") {
            continue;
        }
        let plain = !href.contains(':') && !href.contains("%3A");
        if plain || href.contains("Category:") {
            links.insert(format!("{domain}{href}"));
        }
    }
    links
}

/// Text blocks that feed the index: paragraphs and headings.
fn extract_text_blocks(page: &Html, sel: &Selector) -> Vec<String> {
    page.select(sel)
        .map(|node| node.text().collect::<String>())
        .filter(|t| !t.trim().is_empty())
        .collect()
}

fn save_checkpoint(paths: &IndexPaths, index: &Index, frontier: &VecDeque<String>) -> Result<()> {
    persist::save_vocabulary(paths, &index.vocabulary().terms_in_order())?;
    persist::save_documents(paths, index.documents())?;
    persist::save_matrix(paths, index.matrix())?;
    let pending: Vec<String> = frontier.iter().cloned().collect();
    persist::save_frontier(paths, &pending)?;
    let meta = MetaFile {
        version: ARTIFACT_VERSION,
        num_terms: index.num_terms(),
        num_docs: index.num_docs(),
        created_at: time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    };
    persist::save_meta(paths, &meta)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_filter_keeps_plain_and_category_pages() {
        let html = Html::parse_document(
            r#"<html><body>
            <a href="/wiki/Cat">cat</a>
            <a href="/wiki/Special:Random">special</a>
            <a href="/wiki/Category:Animals">category</a>
            <a href="/wiki/File:Cat.jpg">file</a>
            <a href="/wiki/Help%3AContents">escaped</a>
            <a href="https://elsewhere.example/wiki/Dog">absolute</a>
            </body></html>"#,
        );
        let sel = Selector::parse("a").unwrap();
        let links = extract_links(&html, &sel, "https://w.example");
        assert!(links.contains("https://w.example/wiki/Cat"));
        assert!(links.contains("https://w.example/wiki/Category:Animals"));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn text_blocks_come_from_paragraphs_and_headings() {
        let html = Html::parse_document(
            "<html><body><h1>Cats</h1><p>Cats are animals.</p>\
             <div>not this</div><script>nor_this()</script></body></html>",
        );
        let sel = Selector::parse("p, h1, h2, h3, h4, h5, h6").unwrap();
        let blocks = extract_text_blocks(&html, &sel);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("Cats"));
        assert!(!blocks.iter().any(|b| b.contains("not this")));
    }
}

use anyhow::Result;
use clap::Parser;
use engine::engine::ArtifactLoad;
use engine::{EngineError, SearchEngine};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "search")]
#[command(about = "Query a crawled checkpoint: exact, reduced, or approximate ranking")]
struct Cli {
    /// Checkpoint directory written by the crawler
    #[arg(long, default_value = "./index")]
    index: String,
    /// Reduction rank; 0 ranks exactly over the full weighted matrix
    #[arg(long, default_value_t = 0)]
    k: usize,
    /// Use the approximate nearest-neighbor index (requires k > 0)
    #[arg(long, default_value_t = false)]
    ann: bool,
    /// Emit results as JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
    /// The query text
    query: String,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let (engine, report) = SearchEngine::open(&args.index)?;
    for (name, load) in [
        ("vocabulary", report.vocabulary),
        ("documents", report.documents),
        ("matrix", report.matrix),
    ] {
        if load == ArtifactLoad::Missing {
            tracing::warn!(artifact = name, "checkpoint artifact missing, starting empty");
        }
    }
    tracing::info!(
        docs = engine.num_docs(),
        terms = engine.num_terms(),
        "index loaded"
    );

    let response = match engine.search(&args.query, args.k, args.ann) {
        Ok(r) => r,
        Err(EngineError::EmptyQuery) => {
            eprintln!("invalid query: no indexable terms");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.ann_ignored {
        eprintln!("note: --ann ignored because k=0; ranked exactly");
    }
    println!("mode: {:?}", response.mode);
    for (rank, hit) in response.hits.iter().enumerate() {
        println!("{:>2}. {}  ({})", rank + 1, hit.locator, hit.annotation);
    }
    if response.hits.is_empty() {
        println!("no results");
    }
    Ok(())
}

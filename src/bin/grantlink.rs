use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use grantlink::checkpoint::{Checkpoint, Stage, write_publication_table};
use grantlink::citations::{self, ImpactFactors, ScholarClient};
use grantlink::config::{Settings, load_config};
use grantlink::corpus::Corpus;
use grantlink::scan::CorpusScanner;
use grantlink::score::{CentroidMode, CorpusBodies, SimilarityScorer};
use grantlink::seeds::{
    SeedTableConfig, SeedTableReader, discover_seeds, resolve_seed_records, write_seed_table,
};
use grantlink::{GrantIndex, JatsExtractor};

/// Link full-text articles to funding grants through shared authorship and topical similarity
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file layered over ./grantlink.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Corpus root directory
    #[arg(long, global = true, value_name = "DIR")]
    corpus: Option<PathBuf>,

    /// Worker threads for scanning and scoring
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find seed articles that acknowledge the funder with a grant number
    DiscoverSeeds {
        /// Seed table to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build the grant index from a seed table
    LoadSeeds {
        /// Seed table
        seeds: PathBuf,

        /// Headerless eight-column table with impact factors
        #[arg(long)]
        legacy: bool,

        /// Checkpoint to write
        #[arg(short, long, default_value = "seeded.json")]
        output: PathBuf,
    },

    /// Append candidates sharing an author with each grant
    Scan {
        /// Seeded checkpoint
        #[arg(long, default_value = "seeded.json")]
        checkpoint: PathBuf,

        #[arg(short, long, default_value = "scanned.json")]
        output: PathBuf,
    },

    /// Keep candidates similar to their grant's seeds
    Score {
        /// Scanned checkpoint
        #[arg(long, default_value = "scanned.json")]
        checkpoint: PathBuf,

        #[arg(short, long, default_value = "scored.json")]
        output: PathBuf,

        /// Minimum cosine similarity
        #[arg(long)]
        threshold: Option<f64>,

        /// Divide the seed sum by the seed count plus one
        #[arg(long)]
        legacy_centroid: bool,
    },

    /// Write one row per grant and publication
    Export {
        #[arg(long, default_value = "scored.json")]
        checkpoint: PathBuf,

        /// Table to write, stdout when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Look up citation counts, resuming an existing output
    LookupCitations {
        /// Article table in seed table layout
        articles: PathBuf,

        #[arg(long)]
        legacy: bool,

        /// Citation table to append to
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Insert journal impact factors into a citation table
    Enrich {
        citations: PathBuf,

        #[arg(long)]
        impact_factors: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// List journals without an impact factor entry
    MissingJournals {
        citations: PathBuf,

        #[arg(long)]
        impact_factors: PathBuf,

        /// Append the missing journals to the impact factor table
        #[arg(long)]
        append: bool,
    },

    /// Citation count and impact factor per publication, one line per grant
    GrantSummary {
        citations: PathBuf,

        #[arg(long)]
        impact_factors: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut settings = load_config(cli.config.as_deref())
        .and_then(|config| config.resolve())
        .context("invalid configuration")?;
    if let Some(root) = cli.corpus {
        settings.corpus_root = Some(root);
    }
    if cli.workers.is_some() {
        settings.workers = cli.workers;
    }

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current documents");
            cancel_on_signal.cancel();
        }
    });

    match cli.command {
        Command::DiscoverSeeds { output } => discover(settings, output, cancel).await,
        Command::LoadSeeds {
            seeds,
            legacy,
            output,
        } => load_seeds(settings, seeds, legacy, output).await,
        Command::Scan { checkpoint, output } => scan(settings, checkpoint, output, cancel).await,
        Command::Score {
            checkpoint,
            output,
            threshold,
            legacy_centroid,
        } => {
            if let Some(threshold) = threshold {
                settings.scoring.threshold = threshold;
            }
            if legacy_centroid {
                settings.scoring.centroid = CentroidMode::Legacy;
            }
            score(settings, checkpoint, output).await
        }
        Command::Export { checkpoint, output } => export(&checkpoint, output.as_deref()),
        Command::LookupCitations {
            articles,
            legacy,
            output,
        } => lookup(settings, &articles, legacy, &output, &cancel).await,
        Command::Enrich {
            citations,
            impact_factors,
            output,
        } => enrich(&citations, &impact_factors, &output),
        Command::MissingJournals {
            citations,
            impact_factors,
            append,
        } => missing_journals(&citations, &impact_factors, append),
        Command::GrantSummary {
            citations,
            impact_factors,
            output,
        } => grant_summary(&citations, &impact_factors, output.as_deref()),
    }
}

fn open_corpus(settings: &Settings) -> anyhow::Result<Corpus> {
    let Some(root) = &settings.corpus_root else {
        bail!("no corpus root: pass --corpus or set [corpus] root");
    };
    Ok(Corpus::open(root, &settings.folders)?)
}

fn seed_reader(legacy: bool) -> SeedTableReader {
    if legacy {
        SeedTableReader::new().with_config(SeedTableConfig::legacy())
    } else {
        SeedTableReader::new()
    }
}

fn load_checkpoint(path: &Path, allowed: &[Stage]) -> anyhow::Result<GrantIndex> {
    let checkpoint = Checkpoint::load(path)
        .with_context(|| format!("reading checkpoint {}", path.display()))?;
    checkpoint.expect_stage(allowed)?;
    Ok(checkpoint.into_index())
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn output_writer(path: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(create(path)?),
        None => Box::new(io::stdout().lock()),
    })
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

async fn discover(settings: Settings, output: PathBuf, cancel: CancellationToken) -> anyhow::Result<()> {
    let corpus = open_corpus(&settings)?;
    let (rows, report) = tokio::task::spawn_blocking(move || {
        discover_seeds(&corpus, &JatsExtractor::new(), settings.workers, &cancel)
    })
    .await??;

    write_seed_table(create(&output)?, &rows)?;
    println!(
        "scanned {}, seeds {}, failed {}, without funding text {}{}",
        report.scanned,
        report.seeds,
        report.failed,
        report.without_funding_text,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

async fn load_seeds(
    settings: Settings,
    seeds: PathBuf,
    legacy: bool,
    output: PathBuf,
) -> anyhow::Result<()> {
    let rows = seed_reader(legacy)
        .read_path(&seeds)
        .with_context(|| format!("reading seed table {}", seeds.display()))?;
    let corpus = open_corpus(&settings)?;

    let index = tokio::task::spawn_blocking(move || -> grantlink::Result<GrantIndex> {
        let records = resolve_seed_records(rows, &corpus, &JatsExtractor::new());
        let mut index = GrantIndex::new();
        index.load_seeds(records)?;
        Ok(index)
    })
    .await??;

    Checkpoint::new(Stage::Seeded, &index).save(&output)?;
    let seeds: usize = index.grants().map(|g| g.publications().len()).sum();
    println!("grants {}, seeds {}", index.len(), seeds);
    Ok(())
}

async fn scan(
    settings: Settings,
    checkpoint: PathBuf,
    output: PathBuf,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut index = load_checkpoint(&checkpoint, &[Stage::Seeded])?;
    let corpus = open_corpus(&settings)?;

    let (index, report) = tokio::task::spawn_blocking(move || {
        let report = CorpusScanner::new(JatsExtractor::new())
            .with_workers(settings.workers)
            .with_cancellation(cancel)
            .scan(&corpus, &mut index)?;
        grantlink::Result::Ok((index, report))
    })
    .await??;

    println!(
        "scanned {}, matched {}, failed {}, without authors {}{}",
        report.scanned,
        report.matched,
        report.failed,
        report.without_authors,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    for (grant_id, count) in &report.per_grant {
        println!("  {grant_id}: {count} candidates");
    }
    if report.interrupted {
        tracing::warn!(output = %output.display(), "scan interrupted, no checkpoint written");
    }
    Checkpoint::scanned(&index, &report)?.save(&output)?;
    Ok(())
}

async fn score(settings: Settings, checkpoint: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let index = load_checkpoint(&checkpoint, &[Stage::Scanned, Stage::Scored])?;
    let corpus = open_corpus(&settings)?;
    let scorer = SimilarityScorer::new(settings.scoring)?.with_workers(settings.workers);

    let (index, report) = tokio::task::spawn_blocking(move || {
        let bodies = CorpusBodies::new(&corpus, JatsExtractor::new());
        scorer.score_index(index, &bodies)
    })
    .await??;

    Checkpoint::new(Stage::Scored, &index).save(&output)?;
    println!(
        "grants scored {}, degenerate {}, accepted {}, rejected {}, without body {}",
        report.grants_scored,
        report.grants_degenerate,
        report.accepted,
        report.rejected,
        report.unvectorized
    );
    Ok(())
}

fn export(checkpoint: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let index = load_checkpoint(checkpoint, &[Stage::Seeded, Stage::Scanned, Stage::Scored])?;
    let rows = write_publication_table(output_writer(output)?, &index)?;
    tracing::info!(rows, "publication table written");
    Ok(())
}

async fn lookup(
    settings: Settings,
    articles: &Path,
    legacy: bool,
    output: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let rows = seed_reader(legacy)
        .read_path(articles)
        .with_context(|| format!("reading article table {}", articles.display()))?;
    let finished = citations::finished_titles(output)?;
    let client = ScholarClient::new(settings.scholar)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .with_context(|| format!("opening {}", output.display()))?;
    let report = citations::lookup_citations(&client, &rows, &finished, file, cancel).await?;

    println!(
        "found {}, not found {}, failed {}, already done {}{}",
        report.found,
        report.not_found,
        report.failed,
        report.skipped,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

fn read_citations_and_factors(
    citations_path: &Path,
    factors_path: &Path,
) -> anyhow::Result<(Vec<citations::CitationRow>, ImpactFactors)> {
    let rows = citations::read_citation_rows(&read_text(citations_path)?)?;
    let factors = ImpactFactors::read(&read_text(factors_path)?)?;
    Ok((rows, factors))
}

fn enrich(citations_path: &Path, factors_path: &Path, output: &Path) -> anyhow::Result<()> {
    let (rows, factors) = read_citations_and_factors(citations_path, factors_path)?;
    let enriched = citations::enrich(rows, &factors);
    let known = enriched.iter().filter(|r| r.impact_factor.is_some()).count();
    citations::write_enriched(create(output)?, &enriched)?;
    println!("rows {}, with impact factor {}", enriched.len(), known);
    Ok(())
}

fn missing_journals(citations_path: &Path, factors_path: &Path, append: bool) -> anyhow::Result<()> {
    let (rows, factors) = read_citations_and_factors(citations_path, factors_path)?;
    let missing = citations::missing_journals(&rows, &factors);
    for journal in &missing {
        println!("{journal}");
    }
    if append && !missing.is_empty() {
        citations::append_journals(factors_path, &missing)?;
        tracing::info!(journals = missing.len(), path = %factors_path.display(), "journals appended");
    }
    Ok(())
}

fn grant_summary(
    citations_path: &Path,
    factors_path: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let (rows, factors) = read_citations_and_factors(citations_path, factors_path)?;
    let summaries = citations::grant_summary(&citations::enrich(rows, &factors));
    citations::write_grant_summary(output_writer(output)?, &summaries)?;
    Ok(())
}

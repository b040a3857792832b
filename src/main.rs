use kbsearch::cli::{Cli, Commands, ConfigAction, IndexAction};
use kbsearch::config::Config;
use kbsearch::corpus::{resolve_dimension, CorpusKind, EmbeddingDimension};
use kbsearch::error::{KbError, Result};
use kbsearch::index::{IndexMaintainer, IndexRegistry, IndexScope};
use kbsearch::retrieval::{HybridQuery, HybridSearcher, MetadataFilter, SearchHit};
use kbsearch::storage::{self, Database};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Search {
            text,
            embedding,
            dimension,
            limit,
            source,
            filter,
            code,
            index,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let request = SearchRequest {
                text,
                embedding_file: embedding,
                dimension,
                limit,
                source,
                filter,
                code,
                build_index: index,
                json,
            };
            cmd_search(&config, request)?;
        }
        Commands::Counts { source_ids, json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_counts(&config, &source_ids, json)?;
        }
        Commands::Stats => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_stats(&config)?;
        }
        Commands::Index { action } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_index(&config, action)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "kbsearch=debug" } else { "kbsearch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

struct SearchRequest {
    text: String,
    embedding_file: PathBuf,
    dimension: Option<usize>,
    limit: Option<usize>,
    source: Option<String>,
    filter: Option<String>,
    code: bool,
    build_index: bool,
    json: bool,
}

fn cmd_search(config: &Config, request: SearchRequest) -> Result<()> {
    let embedding = read_embedding(&request.embedding_file)?;
    let dimension = request.dimension.unwrap_or(embedding.len());

    // Fail on bad input before opening anything
    let slot_dimension = resolve_dimension(dimension)?;
    let filter = request
        .filter
        .as_deref()
        .map(MetadataFilter::parse)
        .transpose()?;

    let database = Arc::new(open_database(config)?);
    let registry = Arc::new(IndexRegistry::new());
    let kind = if request.code {
        CorpusKind::CodeExamples
    } else {
        CorpusKind::Chunks
    };

    if request.build_index {
        let maintainer = IndexMaintainer::new(
            Arc::clone(&database),
            Arc::clone(&registry),
            config.indexing.clone(),
        );
        let slot = slot_dimension.slot(kind);
        maintainer.build(slot, IndexScope::Corpus)?;
        maintainer.build_partial_indexes(slot)?;
    }

    let searcher = HybridSearcher::new(database, registry, config.retrieval.clone());

    let mut query = HybridQuery::new(embedding, dimension, request.text);
    if let Some(limit) = request.limit {
        query = query.with_match_count(limit);
    }
    if let Some(source) = request.source {
        query = query.with_source(source);
    }
    if let Some(filter) = filter {
        query = query.with_metadata_filter(filter.into_value());
    }

    let rt = runtime()?;
    if request.code {
        let hits = rt.block_on(searcher.search_code_examples(&query))?;
        print_hits(&hits, request.json, |h| {
            format!("{}#{} ({})", h.item.url, h.item.chunk_number, h.item.summary)
        })
    } else {
        let hits = rt.block_on(searcher.search_chunks(&query))?;
        print_hits(&hits, request.json, |h| {
            format!("{}#{}", h.item.url, h.item.chunk_number)
        })
    }
}

fn print_hits<I: Serialize>(
    hits: &[SearchHit<I>],
    json: bool,
    describe: impl Fn(&SearchHit<I>) -> String,
) -> Result<()> {
    if json {
        println!("{}", to_pretty_json(hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:>3}. [{:<7}] {:.4}  {}",
            i + 1,
            hit.match_type.as_str(),
            hit.similarity,
            describe(hit)
        );
    }
    Ok(())
}

fn cmd_counts(config: &Config, source_ids: &[String], json: bool) -> Result<()> {
    let database = Arc::new(open_database(config)?);
    let searcher = HybridSearcher::new(
        database,
        Arc::new(IndexRegistry::new()),
        config.retrieval.clone(),
    );

    let rt = runtime()?;
    let counts = rt.block_on(searcher.source_counts(source_ids))?;

    if json {
        println!("{}", to_pretty_json(&counts)?);
        return Ok(());
    }

    println!("{:<32} {:>10} {:>14}", "SOURCE", "DOCUMENTS", "CODE EXAMPLES");
    for row in counts {
        println!(
            "{:<32} {:>10} {:>14}",
            row.source_id, row.documents_count, row.code_examples_count
        );
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let database = open_database(config)?;
    let stats = database.stats()?;

    println!("kbsearch corpus");
    println!("===============");
    println!("Sources:        {}", stats.source_count);
    println!(
        "Chunks:         {} ({} embedded)",
        stats.chunk_count, stats.embedded_chunk_count
    );
    println!(
        "Code examples:  {} ({} embedded)",
        stats.code_example_count, stats.embedded_code_example_count
    );
    println!(
        "Short queries:  < {} chars, {}",
        config.retrieval.short_query_min_chars,
        config.retrieval.short_query_policy.as_str()
    );

    Ok(())
}

fn cmd_index(config: &Config, action: IndexAction) -> Result<()> {
    match action {
        IndexAction::Build {
            dimension,
            code,
            source,
            partial,
        } => {
            let dimension: EmbeddingDimension = resolve_dimension(dimension)?;
            let kind = if code {
                CorpusKind::CodeExamples
            } else {
                CorpusKind::Chunks
            };
            let slot = dimension.slot(kind);

            let database = Arc::new(open_database(config)?);
            let registry = Arc::new(IndexRegistry::new());
            let maintainer =
                IndexMaintainer::new(database, Arc::clone(&registry), config.indexing.clone());

            let scope = match source {
                Some(id) => IndexScope::Source(id),
                None => IndexScope::Corpus,
            };
            maintainer.build(slot, scope)?;
            if partial {
                maintainer.build_partial_indexes(slot)?;
            }

            for info in registry.list() {
                println!(
                    "✓ {}: {} rows (max id {})",
                    info.key, info.coverage.rows, info.coverage.max_id
                );
            }
        }
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| KbError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    KbError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            println!("{}", to_pretty_json(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| KbError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            // Save default config
            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'kbsearch config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn open_database(config: &Config) -> Result<Database> {
    let data_dir = expand_path(&config.storage.data_dir)?;
    storage::open(&config.storage, &data_dir)
}

fn read_embedding(path: &Path) -> Result<Vec<f32>> {
    let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
        source: e,
        context: format!("Failed to read embedding file: {:?}", path),
    })?;
    serde_json::from_str(&content).map_err(|e| KbError::Json {
        source: e,
        context: format!("Embedding file {:?} must hold a JSON array of numbers", path),
    })
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| KbError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| KbError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| KbError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| KbError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

use icd_mapper::catalog::{read_source, Catalog};
use icd_mapper::cli::{Cli, Commands, ConfigAction};
use icd_mapper::config::Config;
use icd_mapper::embedding::{EmbeddingProvider, FastEmbedProvider};
use icd_mapper::engine::{BuildLifecycle, BuildState, MappingEngine};
use icd_mapper::error::{MapperError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Map {
            diagnoses,
            file,
            concurrent,
        } => {
            cmd_map(cli.config, diagnoses, file, concurrent)?;
        }
        Commands::Search { query, limit } => {
            cmd_search(cli.config, &query, limit)?;
        }
        Commands::Codes { offset, limit } => {
            cmd_codes(cli.config, offset, limit)?;
        }
        Commands::Build { force } => {
            cmd_build(cli.config, force)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "icd_mapper=debug"
    } else {
        "icd_mapper=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries JSON output only
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_map(
    config_path: Option<PathBuf>,
    mut diagnoses: Vec<String>,
    file: Option<PathBuf>,
    concurrent: bool,
) -> Result<()> {
    if let Some(file) = file {
        diagnoses.extend(read_lines(&file)?);
    }
    if diagnoses.is_empty() {
        return Err(MapperError::Config(
            "No diagnoses given. Pass them as arguments or with --file".to_string(),
        ));
    }

    let config = load_config(config_path)?;
    let engine = open_engine(&config)?;
    let max = config.batch.max_batch_size;

    let report = if concurrent {
        runtime()?.block_on(engine.resolve_batch_concurrent(diagnoses, max))?
    } else {
        engine.resolve_batch(&diagnoses, max)?
    };

    print_json(&report)
}

fn cmd_search(config_path: Option<PathBuf>, query: &str, limit: usize) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = open_engine(&config)?;
    let hits = engine.search_by_text(query, limit)?;

    if hits.is_empty() {
        eprintln!("No matching codes for '{}'", query);
    }
    print_json(&hits)
}

fn cmd_codes(config_path: Option<PathBuf>, offset: i64, limit: usize) -> Result<()> {
    let config = load_config(config_path)?;
    let records = read_source(
        &config.catalog_source(),
        config.catalog.format,
        config.catalog.billable_only,
    )?;
    let catalog = Catalog::load(records)?;
    let page = catalog.page(offset, limit)?;

    print_json(&page)
}

fn cmd_build(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    use std::time::Duration;

    let config = load_config(config_path)?;
    let provider = provider(&config)?;
    let runtime = runtime()?;

    let status = runtime.block_on(async {
        let lifecycle = BuildLifecycle::new();
        lifecycle.start_from_config(config, provider, force);

        let mut last_message = String::new();
        while lifecycle.poll().state == BuildState::InProgress {
            let status = lifecycle.poll();
            if status.message != last_message {
                eprintln!("  {:>5.1}%  {}", status.progress * 100.0, status.message);
                last_message = status.message;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        lifecycle.wait().await
    });

    match status.state {
        BuildState::Completed => {
            println!("✓ {}", status.message);
            Ok(())
        }
        _ => Err(MapperError::Build(status.message)),
    }
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            print_json(&config)?;
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Catalog: {}", config.catalog_source().display());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let mut config = Config::default();
            let data_dir = Config::default_data_dir()?;
            config.catalog.source = data_dir.join("icd10cm_order_2025.txt");
            config.storage.data_dir = data_dir.join("knowledge_base");
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Place the ICD-10-CM order file at {}", config.catalog.source.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'icd-mapper config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = FastEmbedProvider::new(&config.embedding.model, config.cache_dir())?;
    Ok(Arc::new(provider))
}

fn open_engine(config: &Config) -> Result<MappingEngine> {
    let provider = provider(config)?;
    MappingEngine::initialize(config, provider, false, |done, total| {
        tracing::debug!("Embedded {}/{} catalog entries", done, total)
    })
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| MapperError::Io {
        source: e,
        context: "Failed to start async runtime".to_string(),
    })
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| MapperError::Io {
        source: e,
        context: format!("Failed to read diagnoses file: {:?}", path),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| MapperError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

mod asset_codec;
mod backends;
mod config;
mod db_manager;
mod downloader;
mod error;
mod eviction;
mod filters;
mod image_pipeline;
mod media_cache;
mod media_kind;
mod media_service;
mod metadata_tags;
mod selector;
mod state_store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::info;

use asset_codec::AssetCodec;
use backends::ureq_transport::UreqTransport;
use config::Config;
use db_manager::DbManager;
use error::MediaError;
use eviction::{EvictionLoop, Evictor};
use filters::{FilterDimension, FilterSet};
use media_kind::MediaKind;
use media_service::{ConsumerScope, MediaService};
use state_store::MediaStateStore;

#[derive(Debug, Parser)]
#[command(name = "birdcache", about = "Bird media cache and delivery tool")]
struct Cli {
    /// Config file; created with defaults when missing.
    #[arg(long, env = "BIRDCACHE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the next image or song for a species.
    Fetch {
        species: String,
        /// `images` or `songs`.
        #[arg(long, default_value = "images")]
        kind: String,
        #[command(flatten)]
        filters: FilterArgs,
        /// `channel:<id>` or `web.session:<id>`.
        #[arg(long, default_value = "channel:cli")]
        scope: String,
    },
    /// Run one eviction pass.
    Evict,
    /// Run eviction periodically until the process is killed.
    EvictLoop {
        /// Stop after this many seconds instead of running forever.
        #[arg(long)]
        for_secs: Option<u64>,
    },
    /// Show how filters resolve and encode.
    Filters {
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Encode or decode shareable asset codes.
    AssetCode {
        #[command(subcommand)]
        action: AssetCodeAction,
    },
}

#[derive(Debug, Subcommand)]
enum AssetCodeAction {
    Encode { asset_id: String },
    Decode { code: String },
}

#[derive(Debug, Default, Args)]
struct FilterArgs {
    /// Filter words, e.g. "male adult bw".
    #[arg(long, default_value = "")]
    filters: String,
    /// Start from an encoded filter integer instead of filter words.
    #[arg(long, allow_negative_numbers = true)]
    from_int: Option<i64>,
    /// Replace one dimension with upstream codes, e.g. `sex=m f`.
    #[arg(long = "codes", value_name = "DIMENSION=CODES")]
    codes: Vec<String>,
    #[arg(long)]
    small: bool,
    #[arg(long)]
    bw: bool,
    /// Toggle the options set in this filter integer.
    #[arg(long, allow_negative_numbers = true)]
    xor: Option<i64>,
}

impl FilterArgs {
    fn build(&self) -> Result<FilterSet, MediaError> {
        let mut filters = match self.from_int {
            Some(_) if !self.filters.trim().is_empty() => {
                return Err(MediaError::Validation(
                    "--from-int and --filters cannot be combined".to_string(),
                ));
            }
            Some(value) => FilterSet::from_int(value)?,
            None => FilterSet::parse(&self.filters),
        };
        for entry in &self.codes {
            let (name, codes) = entry.split_once('=').ok_or_else(|| {
                MediaError::Validation(format!("expected DIMENSION=CODES, got '{entry}'"))
            })?;
            let dimension = FilterDimension::from_name(name)
                .ok_or_else(|| MediaError::Validation(format!("unknown filter dimension '{name}'")))?;
            filters = filters.with_codes(dimension, codes)?;
        }
        if self.small {
            filters = filters.with_small(true);
        }
        if self.bw {
            filters = filters.with_black_and_white(true);
        }
        if let Some(mask) = self.xor {
            filters = filters.xor(mask)?;
        }
        Ok(filters)
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn MediaStateStore>, MediaError> {
    Ok(Arc::new(DbManager::open(&config.store.database_path)?))
}

fn run_fetch(
    config: &Config,
    species: &str,
    kind: &str,
    filters: &FilterArgs,
    scope: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = MediaKind::from_name(kind)
        .ok_or_else(|| MediaError::Validation(format!("unknown media kind '{kind}'")))?;
    let scope = ConsumerScope::parse(scope)
        .ok_or_else(|| MediaError::Validation(format!("bad consumer scope '{scope}'")))?;
    let filters = match filters.build() {
        Ok(filters) => filters,
        Err(err) => {
            println!("{}: {}", err.outcome().message(), err);
            return Ok(());
        }
    };
    let transport = Arc::new(UreqTransport::new(
        Duration::from_secs(config.catalog.connect_timeout_secs),
        Duration::from_secs(config.catalog.read_timeout_secs),
        &config.catalog.user_agent,
    ));
    let service = MediaService::from_config(config, transport, open_store(config)?)?;

    match service.fetch_for_user(species, kind, &filters, &scope) {
        Ok(delivered) => {
            println!("{}", delivered.path.display());
            println!("content-type: {}", delivered.content_type);
            println!(
                "asset: {} (.{}, index {}, cached at {})",
                delivered.asset_id,
                delivered.extension,
                delivered.index,
                delivered.source_path.display()
            );
            if let Some(code) = delivered.asset_code {
                println!("asset-code: {code}");
            }
        }
        Err(outcome) => println!("{}", outcome.message()),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = config::load_or_create(&config_path)?;
    log::set_max_level(config.log_level_filter());
    info!("Loaded config. path={}", config_path.display());

    match cli.command {
        Command::Fetch {
            species,
            kind,
            filters,
            scope,
        } => run_fetch(&config, &species, &kind, &filters, &scope)?,
        Command::Evict => {
            let evictor = Evictor::new(config.cache.root_dir.clone(), open_store(&config)?);
            for member in evictor.evict(&config.eviction_policy()) {
                println!("{member}");
            }
        }
        Command::EvictLoop { for_secs } => {
            let evictor = Arc::new(Evictor::new(
                config.cache.root_dir.clone(),
                open_store(&config)?,
            ));
            let interval = Duration::from_secs(config.eviction.interval_secs);
            info!("Evictor: running every {}s", interval.as_secs());
            let eviction_loop = EvictionLoop::spawn(evictor, config.eviction_policy(), interval);
            match for_secs {
                Some(secs) => {
                    std::thread::sleep(Duration::from_secs(secs));
                    eviction_loop.stop();
                }
                None => eviction_loop.join(),
            }
        }
        Command::Filters { filters } => {
            let filters = filters.build()?;
            for line in filters.display() {
                println!("{line}");
            }
            println!("bits: {}", filters.to_int());
        }
        Command::AssetCode { action } => {
            let codec = AssetCodec::from_hex_key(&config.asset_codes.key_hex)?;
            match action {
                AssetCodeAction::Encode { asset_id } => println!("{}", codec.encode_str(&asset_id)?),
                AssetCodeAction::Decode { code } => println!("{}", codec.decode(&code)?),
            }
        }
    }
    Ok(())
}

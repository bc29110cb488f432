use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use site_scraper::config::AppConfig;
use site_scraper::constants::{BIND_ADDR_ENV, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use site_scraper::pipeline::aggregate::AggregateOptions;
use site_scraper::pipeline::{HarvestRequest, Pipeline};
use site_scraper::registry::{ProfileRegistry, RegistryHandle};
use site_scraper::render::{self, TableFormat};
use site_scraper::server::{self, AppState};
use site_scraper::{logging, metrics};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "site_scraper")]
#[command(about = "Fetch pages, extract records with declarative profiles, validate and tabulate them")]
#[command(version)]
struct Cli {
    /// Path to config.toml (falls back to SITE_SCRAPER_CONFIG, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Bind address, overrides SITE_SCRAPER_BIND and [server].bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run one harvest and print the result
    Harvest {
        #[arg(long)]
        profile: String,
        /// URL or path; defaults to the profile's source
        #[arg(long)]
        source: Option<String>,
        /// Comma-separated output columns
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,
        /// Comma-separated grouping fields
        #[arg(long, value_delimiter = ',')]
        group_by: Vec<String>,
        /// Summary as field=kind (count, sum, min, max, distinct_count); repeatable
        #[arg(long = "summary", value_parser = parse_summary)]
        summaries: Vec<(String, String)>,
        #[arg(long, value_enum, default_value_t = TableFormat::Json)]
        format: TableFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Print per-column statistics to stderr
        #[arg(long)]
        stats: bool,
    },
    /// List configured profiles
    Profiles,
    /// Load and compile the config, then exit
    CheckConfig,
}

fn parse_summary(s: &str) -> Result<(String, String), String> {
    let (field, kind) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=kind, got '{}'", s))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", s));
    }
    Ok((field.to_string(), kind.trim().to_string()))
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let path = config_path(&cli);
    let config = AppConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    let _log_guard = logging::init_logging(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            let registry = ProfileRegistry::from_config(&config).context("compiling profiles")?;
            info!("Loaded {} profile(s) from {}", registry.len(), path.display());

            let bind = bind
                .or_else(|| std::env::var(BIND_ADDR_ENV).ok())
                .unwrap_or_else(|| config.server.bind.clone());
            let addr: SocketAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address '{}'", bind))?;

            let prometheus = match metrics::init() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            };
            let state = AppState {
                registry: Arc::new(RegistryHandle::new(registry, Some(path.clone()))),
                pipeline: Arc::new(Pipeline::from_config(&config.fetch)?),
                metrics: prometheus,
            };
            server::start_server(state, addr).await?;
        }
        Commands::Harvest {
            profile,
            source,
            columns,
            group_by,
            summaries,
            format,
            output,
            timeout_secs,
            stats,
        } => {
            let registry = ProfileRegistry::from_config(&config).context("compiling profiles")?;
            let pipeline = Pipeline::from_config(&config.fetch)?;
            let request = HarvestRequest {
                profile,
                source,
                aggregate: AggregateOptions {
                    columns,
                    group_by,
                    summaries: summaries.into_iter().collect(),
                },
                timeout_secs,
            };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let outcome = pipeline.run(&registry, &request, &cancel).await?;
            eprintln!(
                "📊 {}: {} extracted, {} accepted, {} rejected from {} document(s)",
                outcome.profile,
                outcome.extracted,
                outcome.accepted,
                outcome.rejected,
                outcome.documents.len()
            );
            for failure in &outcome.failures {
                for e in &failure.errors {
                    eprintln!("   ⚠️  record {} {}: {}", failure.index, e.field, e.message);
                }
            }
            if stats {
                for column in &outcome.table.columns {
                    if let Some(s) = outcome.table.column_stats(column) {
                        let sum = s.sum.map(|v| format!(" sum={}", v)).unwrap_or_default();
                        eprintln!(
                            "   📈 {}: {} value(s), {} non-null, {} distinct, min={} max={}{}",
                            column, s.count, s.non_null, s.distinct, s.min, s.max, sum
                        );
                    }
                }
            }

            let body = match format {
                TableFormat::Json => serde_json::to_vec_pretty(&outcome)?,
                TableFormat::Csv => render::to_csv(&outcome.table)?,
            };
            match output {
                Some(file) => {
                    std::fs::write(&file, &body)
                        .with_context(|| format!("writing {}", file.display()))?;
                    eprintln!("Output written to {}", file.display());
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&body)?;
                    stdout.write_all(b"\n")?;
                }
            }
        }
        Commands::Profiles => {
            let registry = ProfileRegistry::from_config(&config).context("compiling profiles")?;
            for profile in registry.profiles() {
                let summary = profile.summary();
                println!("{}", summary.name);
                if !summary.description.is_empty() {
                    println!("    {}", summary.description);
                }
                if let Some(source) = &summary.source {
                    println!("    source: {}", source);
                }
                println!("    fields: {}", summary.fields.join(", "));
            }
        }
        Commands::CheckConfig => {
            let registry = ProfileRegistry::from_config(&config).context("compiling profiles")?;
            println!(
                "✅ {} is valid: {} profile(s)",
                path.display(),
                registry.len()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary() {
        assert_eq!(
            parse_summary("price=sum"),
            Ok(("price".to_string(), "sum".to_string()))
        );
        assert!(parse_summary("price").is_err());
        assert!(parse_summary("=sum").is_err());
    }

    #[test]
    fn test_cli_parses_harvest() {
        let cli = Cli::try_parse_from([
            "site_scraper",
            "harvest",
            "--profile",
            "products",
            "--group-by",
            "category",
            "--summary",
            "price=sum",
            "--columns",
            "name,price",
            "--format",
            "csv",
            "--stats",
        ])
        .unwrap();
        match cli.command {
            Commands::Harvest {
                columns,
                summaries,
                format,
                stats,
                ..
            } => {
                assert!(stats);
                assert_eq!(columns, Some(vec!["name".to_string(), "price".to_string()]));
                assert_eq!(summaries, vec![("price".to_string(), "sum".to_string())]);
                assert_eq!(format, TableFormat::Csv);
            }
            _ => panic!("expected harvest"),
        }
    }
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use proxycheck::{
    output::{self, OutputFormat},
    proxy::{
        CheckerConfig, GeoResolver, MmdbResolver, NoGeoResolver, ProbeKind, ProxyChecker,
        ProxyParser,
    },
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// A concurrent proxy checker with anonymity, fraud and capability probing
#[derive(Parser)]
#[command(name = "proxycheck")]
#[command(about = "A concurrent proxy checker with anonymity, fraud and capability probing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxies and print results
    Check {
        /// Input file containing proxies
        input: PathBuf,
        /// Proxy type (socks5, https)
        #[arg(short = 't', long = "type", default_value = "socks5")]
        proxy_type: String,
        /// Timeout in seconds for each attempt
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Number of concurrent checks
        #[arg(short = 'n', long, default_value = "50")]
        concurrency: usize,
        /// Attempts per proxy (min 1)
        #[arg(short, long, default_value = "3")]
        retries: usize,
        /// Probe SMTP/POP3/IMAP/UDP relaying (socks5 only)
        #[arg(long)]
        check_capabilities: bool,
        /// Echo URL reporting origin IP and headers
        #[arg(long, default_value = proxycheck::proxy::checker::DEFAULT_ECHO_URL)]
        echo_url: String,
        /// MaxMind City database for country/city
        #[arg(long)]
        city_db: Option<PathBuf>,
        /// MaxMind ASN database for provider names (needs --city-db)
        #[arg(long)]
        asn_db: Option<PathBuf>,
        /// Write results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output file format (json, csv)
        #[arg(short, long, default_value = "json")]
        format: String,
    },
    /// Parse and normalize a proxy list
    Parse {
        /// Input file containing proxies
        input: PathBuf,
        /// Output file for parsed proxies
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_resolver(city_db: Option<PathBuf>, asn_db: Option<PathBuf>) -> Result<Arc<dyn GeoResolver>> {
    match (city_db, asn_db) {
        (Some(city), asn) => {
            let mut resolver = MmdbResolver::from_path(&city)?;
            if let Some(asn) = asn {
                resolver = resolver.with_asn_path(&asn)?;
            }
            info!(city_db = %city.display(), "geo databases loaded");
            Ok(Arc::new(resolver))
        }
        (None, Some(_)) => {
            warn!("--asn-db ignored without --city-db");
            Ok(Arc::new(NoGeoResolver))
        }
        (None, None) => Ok(Arc::new(NoGeoResolver)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check {
            input,
            proxy_type,
            timeout,
            concurrency,
            retries,
            check_capabilities,
            echo_url,
            city_db,
            asn_db,
            output,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            let probe_kind: ProbeKind = proxy_type.parse()?;

            let proxies = ProxyParser::parse_file(&input, None)?;
            info!(count = proxies.len(), input = %input.display(), "proxies loaded");
            if proxies.is_empty() {
                println!("No proxies found in {:?}", input);
                return Ok(());
            }

            let config = CheckerConfig::new()
                .with_probe_kind(probe_kind)
                .with_timeout(Duration::from_secs(timeout))
                .with_concurrency(concurrency)
                .with_retries(retries)
                .with_capabilities(check_capabilities)
                .with_echo_url(echo_url)
                .with_resolver(build_resolver(city_db, asn_db)?);

            let checker = ProxyChecker::with_config(config);
            let report = checker.run(proxies).await;

            let mut stdout = io::stdout().lock();
            output::print_results_table(&mut stdout, &report.results)?;
            output::print_summary(&mut stdout, &report.stats)?;

            if let Some(path) = output {
                match output::write_file(&path, format, &report.results, &report.stats) {
                    Ok(()) => info!(path = %path.display(), ?format, "results written"),
                    Err(e) => error!(path = %path.display(), "failed to write output file: {:#}", e),
                }
            }
        }
        Commands::Parse { input, output } => {
            let proxies = ProxyParser::parse_file(&input, None)?;
            info!(count = proxies.len(), "proxies parsed");

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&proxies, &output_path)?;
                println!("Saved {} proxies to {:?}", proxies.len(), output_path);
            } else {
                for proxy in &proxies {
                    println!("{}", proxy.to_full_string());
                }
            }
        }
    }

    Ok(())
}

//! Proxy checker: configuration and the batch entry point

use crate::proxy::batch::{retry_until_alive, run_bounded};
use crate::proxy::geo::{GeoResolver, NoGeoResolver};
use crate::proxy::models::{BatchStats, CheckResult, ProbeKind, Proxy};
use crate::proxy::prober::Prober;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent checks
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default number of attempts per proxy
pub const DEFAULT_RETRIES: usize = 3;

/// Default echo endpoint; must answer with `origin` and `headers` JSON fields
pub const DEFAULT_ECHO_URL: &str = "https://httpbin.org/get";

/// Slack on top of the attempt timeout before an attempt is abandoned from
/// outside; the prober already bounds its own I/O by the timeout.
const ATTEMPT_GRACE: Duration = Duration::from_secs(1);

/// Configuration for proxy checker
#[derive(Clone)]
pub struct CheckerConfig {
    /// Tunnel used to reach the echo endpoint
    pub probe_kind: ProbeKind,
    /// Timeout for each attempt
    pub timeout: Duration,
    /// Number of concurrent checks
    pub concurrency: usize,
    /// Attempts per proxy, at least 1
    pub retries: usize,
    /// Probe SMTP/POP3/IMAP/UDP relaying (SOCKS5 only)
    pub check_capabilities: bool,
    /// Echo URL to probe through the proxy
    pub echo_url: String,
    pub resolver: Arc<dyn GeoResolver>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            probe_kind: ProbeKind::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            check_capabilities: false,
            echo_url: DEFAULT_ECHO_URL.to_string(),
            resolver: Arc::new(NoGeoResolver),
        }
    }
}

impl fmt::Debug for CheckerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerConfig")
            .field("probe_kind", &self.probe_kind)
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .field("retries", &self.retries)
            .field("check_capabilities", &self.check_capabilities)
            .field("echo_url", &self.echo_url)
            .finish_non_exhaustive()
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_kind(mut self, probe_kind: ProbeKind) -> Self {
        self.probe_kind = probe_kind;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Values below 1 are raised to 1
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn with_capabilities(mut self, check_capabilities: bool) -> Self {
        self.check_capabilities = check_capabilities;
        self
    }

    pub fn with_echo_url(mut self, url: String) -> Self {
        self.echo_url = url;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

/// Results of a whole batch together with its summary
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<CheckResult>,
    pub stats: BatchStats,
}

/// Proxy checker for validating proxies
#[derive(Clone)]
pub struct ProxyChecker {
    config: Arc<CheckerConfig>,
    prober: Prober,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        let prober = Prober::from_config(&config);
        Self {
            config: Arc::new(config),
            prober,
        }
    }

    /// Check a single proxy, retrying up to the configured number of attempts
    pub async fn check_proxy(&self, proxy: &Proxy) -> CheckResult {
        let attempt_timeout = self.config.timeout + ATTEMPT_GRACE;
        let result = retry_until_alive(proxy, self.config.retries, attempt_timeout, || {
            self.prober.probe_once(proxy)
        })
        .await;

        debug!(
            proxy = %proxy.key(),
            alive = result.alive,
            latency_ms = result.latency_ms,
            "proxy checked"
        );
        result
    }

    /// Check multiple proxies concurrently; returns once all are done
    pub async fn check_proxies(&self, proxies: Vec<Proxy>) -> Vec<CheckResult> {
        let checker = self.clone();
        run_bounded(proxies, self.config.concurrency, move |proxy| {
            let checker = checker.clone();
            async move { checker.check_proxy(&proxy).await }
        })
        .await
    }

    /// Check all proxies and summarize the run
    pub async fn run(&self, proxies: Vec<Proxy>) -> BatchReport {
        info!(
            count = proxies.len(),
            kind = %self.config.probe_kind,
            timeout_secs = self.config.timeout.as_secs_f64(),
            concurrency = self.config.concurrency,
            retries = self.config.retries,
            check_capabilities = self.config.check_capabilities,
            "starting batch"
        );

        let started = Instant::now();
        let results = self.check_proxies(proxies).await;
        let stats = BatchStats::compute(&results, started.elapsed());

        info!(
            total = stats.total_proxies,
            alive = stats.alive_proxies,
            total_ms = stats.total_processing_time_ms,
            "batch finished"
        );

        BatchReport { results, stats }
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

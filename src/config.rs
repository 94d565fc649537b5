use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "scrapeq", about = "Scraping job queue: API server and workers")]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Run database migrations on startup
    #[arg(long, env = "RUN_MIGRATIONS", default_value = "true")]
    pub run_migrations: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the read/submit API (default when no subcommand given)
    Serve {
        /// Listen address
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,
    },
    /// Run the claim and dispatch worker loop
    Work(WorkerConfig),
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval in seconds when no job is pending
    #[arg(long, env = "POLL_INTERVAL", default_value = "10")]
    pub poll_interval: u64,

    /// Item limit for feed jobs that do not specify one
    #[arg(long, env = "DEFAULT_LIMIT", default_value = "10")]
    pub default_limit: u32,

    /// Seconds a single job may run before it is failed
    #[arg(long, env = "JOB_TIMEOUT", default_value = "600")]
    pub job_timeout: u64,

    /// Upper bound on feed scrolls per job
    #[arg(long, env = "MAX_SCROLL_ATTEMPTS", default_value = "20")]
    pub max_scroll_attempts: u32,

    /// Number of independent loops to run in this process
    #[arg(long, env = "CONCURRENCY", default_value = "1")]
    pub concurrency: usize,

    /// Browserless base URL; enables rendered page fetches and the maps feed
    #[arg(long, env = "BROWSERLESS_URL")]
    pub browserless_url: Option<String>,

    #[arg(long, env = "BROWSERLESS_TOKEN")]
    pub browserless_token: Option<String>,
}

impl Config {
    /// Resolve the command, defaulting to Serve if none specified.
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve {
            listen_addr: std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}

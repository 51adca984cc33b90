mod api;
mod audit;
mod cli;
mod clock;
mod config;
mod session;
mod store;
mod table;

use anyhow::Result;
use clap::Parser;
use session::{Scheduler, SessionError, SessionMonitor};
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;
use store::{FileStore, MemoryStore, SessionStore};

#[derive(Parser)]
#[command(name = "nrgadmin", about = "Admin console for the NRG broadcast API")]
pub struct Args {
    #[arg(short = 'c', long = "command", help = "Run one console command and exit")]
    pub command: Option<String>,

    #[arg(long, env = "NRG_API_BASE_URL", help = "API base URL")]
    pub base_url: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Directory holding the shared session state")]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "NRG_ADMIN_PASSWORD",
        hide_env_values = true,
        help = "Password for login (otherwise prompted)"
    )]
    pub password: Option<String>,

    #[arg(long, help = "Skip delete and send confirmations")]
    pub yes: bool,

    #[arg(long, help = "Verbose output (session events)")]
    pub verbose: bool,

    #[arg(long, help = "Debug output (HTTP details and settings)")]
    pub debug: bool,
}

fn init_tracing(args: &Args) {
    let default = if args.debug {
        "nrgadmin=debug"
    } else if args.verbose {
        "nrgadmin=info"
    } else {
        "nrgadmin=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    // CLI flags override config files
    if let Some(url) = &args.base_url {
        cfg.api.base_url = Some(url.clone());
    }
    if let Some(dir) = &args.state_dir {
        cfg.storage.state_dir = Some(dir.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error: {}", e);
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }

    if args.debug {
        eprintln!("[DEBUG] API: {}", cfg.api.base_url());
        eprintln!("[DEBUG] Session policy: {:?}", cfg.session_policy());
        eprintln!("[DEBUG] State dir: {}", cfg.state_dir().display());
    }

    let state_dir = cfg.state_dir();
    let store: Arc<dyn SessionStore> = match FileStore::open(&state_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let err = SessionError::from(e);
            tracing::warn!("{}; session will not be shared with other consoles", err);
            Arc::new(MemoryStore::new())
        }
    };

    let tab_id = uuid::Uuid::new_v4().to_string();
    let audit = if cfg.audit_enabled() {
        let audit_dir = state_dir.join("audit");
        let opened = std::fs::create_dir_all(&audit_dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| audit::AuditLog::new(&audit_dir.join(format!("{}.jsonl", tab_id)), &tab_id));
        match opened {
            Ok(log) => Some(Arc::new(log)),
            Err(e) => {
                tracing::warn!("audit log disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let api = api::ApiClient::new(cfg.api.base_url(), cfg.api.timeout());
    let mut monitor = SessionMonitor::new(
        cfg.session_policy(),
        store,
        Arc::new(clock::SystemClock),
        Arc::new(api.clone()),
    );
    if let Some(log) = &audit {
        monitor = monitor.with_audit(log.clone());
    }

    let ctx = cli::Context {
        history_path: Some(state_dir.join("history.txt")),
        args,
        config: cfg,
        api,
        monitor: monitor.into_shared(),
        scheduler: RefCell::new(Scheduler::idle()),
        audit,
        tab_id,
    };

    if let Some(command) = ctx.args.command.clone() {
        cli::run_once(&ctx, &command)
    } else {
        cli::run_repl(ctx)
    }
}

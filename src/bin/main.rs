#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::net::TcpListener;

    use anyhow::Context as _;
    use tracing::{info, warn};
    use tracing_subscriber::EnvFilter;

    use mkfeed::config::Config;
    use mkfeed::core::db::LocalDb;
    use mkfeed::mailer::{LogMailer, Mailer, SmtpMailer};
    use mkfeed::server::{self, AppState};

    fn init_tracing() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mkfeed=info,actix_web=info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    fn build_state(config: Config) -> anyhow::Result<AppState> {
        let db = match config.snapshot_path() {
            Some(path) => LocalDb::open(path)?,
            None => {
                warn!("MKFEED_DATA_DIR not set; data lives in memory only");
                LocalDb::in_memory()
            }
        };

        let mailer: Box<dyn Mailer + Send + Sync> = match &config.smtp {
            Some(smtp) => Box::new(SmtpMailer::new(smtp)?),
            None => {
                warn!("SMTP_HOST not set; password reset links will only be logged");
                Box::new(LogMailer)
            }
        };

        if config.gemini_api_key.is_none() {
            info!("GEMINI_API_KEY not set; post rewriting is disabled in the client");
        }

        Ok(AppState { db, mailer, config })
    }

    pub async fn run() -> anyhow::Result<()> {
        dotenv::dotenv().ok();
        init_tracing();

        let config = Config::from_env().context("invalid configuration")?;
        let address = format!("0.0.0.0:{}", config.port);
        let state = build_state(config).context("failed to initialise")?;

        let listener =
            TcpListener::bind(&address).with_context(|| format!("failed to bind {address}"))?;
        info!("Server listening on http://{address}");

        server::run(listener, state)?.await?;
        info!("Server stopped");
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() {
    if let Err(err) = native::run().await {
        tracing::error!(error = ?err, "fatal startup error");
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

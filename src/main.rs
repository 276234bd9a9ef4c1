use actix_files as fs;
use actix_web::{App, HttpServer, Responder, web};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use repsight::app_config::{APP_CONFIG_FILE, AppConfigManager, AppSettings, Endpoints};
use repsight::backend_client::BackendClient;
use repsight::handlers::{AppState, configure_api};
use repsight::local_store::LocalStore;
use repsight::prompt_store::PromptStore;
use repsight::session::Session;

const DEFAULT_LOG_FILTER: &str = "repsight=info,actix_web=info";

/// Local server for the RepSight sales assistant UI
#[derive(Parser, Debug)]
#[command(name = "repsight")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Directory holding the local store (favorites, cached auth status)
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Settings file; defaults to repsight_config.json in the data directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "./frontend/dist")]
    static_dir: PathBuf,

    /// Also write daily-rolling log files here
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, env = "REPSIGHT_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "REPSIGHT_AUTH_URL")]
    auth_url: Option<String>,

    #[arg(long, env = "REPSIGHT_MODELS_URL")]
    models_url: Option<String>,

    #[arg(long, env = "REPSIGHT_MODELS_API_KEY", hide_env_values = true)]
    models_api_key: Option<String>,

    #[arg(long, env = "REPSIGHT_SUPABASE_URL")]
    supabase_url: Option<String>,

    #[arg(long, env = "REPSIGHT_SUPABASE_ANON_KEY", hide_env_values = true)]
    supabase_anon_key: Option<String>,
}

impl Cli {
    fn endpoints(&self) -> Endpoints {
        Endpoints {
            api_url: self.api_url.clone(),
            auth_url: self.auth_url.clone(),
            models_url: self.models_url.clone(),
            models_api_key: self.models_api_key.clone(),
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
        }
    }
}

struct StaticRoot(PathBuf);

// Index handler to serve the frontend
async fn index(root: web::Data<StaticRoot>) -> impl Responder {
    fs::NamedFile::open_async(root.0.join("index.html")).await
}

// The guard must live as long as the process or buffered file logs are lost
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "repsight.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn load_settings(config_manager: &AppConfigManager) -> AppSettings {
    match config_manager.load_config() {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config_path = cli.config.clone().unwrap_or_else(|| cli.data_dir.join(APP_CONFIG_FILE));
    let config_manager = Arc::new(AppConfigManager::new(&config_path.to_string_lossy()));
    let settings = load_settings(&config_manager);

    let endpoints = cli.endpoints();
    if endpoints.task_url().is_none() {
        warn!("REPSIGHT_API_URL is not set; prompts cannot be sent");
    }

    let store = Arc::new(LocalStore::in_dir(&cli.data_dir));
    info!("Local store at {}", store.path().display());

    let client = Arc::new(BackendClient::new(endpoints.clone(), settings.request_timeout()).map_err(std::io::Error::other)?);
    let prompt_store =
        Arc::new(PromptStore::new(&endpoints, settings.request_timeout()).map_err(std::io::Error::other)?);
    if !prompt_store.is_configured() {
        warn!("REPSIGHT_SUPABASE_URL or REPSIGHT_SUPABASE_ANON_KEY is not set; the prompt library is unavailable");
    }

    let session = Arc::new(Session::new(
        settings,
        store,
        client.clone(),
        client.clone(),
        client,
    ));
    session.bootstrap().await;

    let app_state = web::Data::new(AppState {
        session,
        config_manager,
        prompt_store,
    });
    let static_root = web::Data::new(StaticRoot(cli.static_dir.clone()));
    let assets_dir = cli.static_dir.join("assets");

    info!("Starting server at http://{}:{}", cli.host, cli.port);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(static_root.clone())
            // API routes
            .service(web::scope("/api").configure(configure_api))
            // Serve static files from the frontend build
            .service(fs::Files::new("/assets", assets_dir.clone()))
            // Serve the index.html for all other routes
            .default_service(web::get().to(index))
    })
    .bind((cli.host.as_str(), cli.port))?
    .run()
    .await
}

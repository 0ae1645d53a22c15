use clap::Parser;
use psq_auth::exchange::HttpExchangeClient;
use psq_auth::lifetime::TokenLifetimeConfig;
use psq_auth::store::FileStore;
use psq_auth::{
    AuthConfig, AuthMachine, AuthorizationCode, CallbackParams, ClientId, Effect, StateToken,
};

/// Drives one mount of the auth machine from the command line
#[derive(Debug, Parser)]
struct Opts {
    /// The application's OAuth2 client ID
    #[clap(short, long, env)]
    client_id: String,

    /// The token exchange endpoint
    #[clap(long, env, default_value = "https://psq.example.com/api/token")]
    token_url: reqwest::Url,

    /// The refresh endpoint
    #[clap(long, env, default_value = "https://psq.example.com/api/refresh")]
    refresh_url: reqwest::Url,

    /// The music service's authorization endpoint
    #[clap(long, env, default_value = "https://accounts.spotify.com/authorize")]
    authorize_url: reqwest::Url,

    /// The canonical application URL
    #[clap(long, env, default_value = "http://localhost:3000/")]
    app_url: reqwest::Url,

    /// The local file used to persist credentials
    #[clap(short = 'f', long, env, default_value = ".psq-credentials.json")]
    credentials_file: std::path::PathBuf,

    /// An authorization code captured from a completed redirect
    #[clap(long, env)]
    code: Option<String>,

    /// The state parameter echoed by the redirect
    #[clap(long, env)]
    state: Option<String>,

    /// The error description echoed by the redirect, if authorization failed
    #[clap(long, env)]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let store = FileStore::new(opts.credentials_file);
    let exchange = HttpExchangeClient::new(
        reqwest::Client::new(),
        opts.token_url,
        opts.refresh_url,
    );
    let config = AuthConfig {
        client_id: ClientId::from(opts.client_id),
        authorize_url: opts.authorize_url,
        app_url: opts.app_url,
        lifetime: TokenLifetimeConfig::default(),
    };

    let mut machine = AuthMachine::new(store, exchange, config);
    let callback = CallbackParams {
        code: opts.code.map(AuthorizationCode::from),
        state: opts.state.map(StateToken::from),
        error: opts.error,
    };

    match machine.mount(callback).await {
        Effect::Stay => {
            tracing::info!(status = ?machine.status(), "nothing further to do")
        }
        Effect::Navigate(url) => {
            tracing::info!(%url, "tokens settled, continue at the canonical URL")
        }
        Effect::Authorize(url) => {
            tracing::info!(%url, "authorization required, open this URL and re-run with --code and --state")
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand};
use qwen_proxy::api::build_routes;
use qwen_proxy::core::models::RoutingStrategy;
use qwen_proxy::core::services::{oauth, CredentialStore, OAuthClient};
use qwen_proxy::core::storage::ConfigStorage;
use qwen_proxy::core::traits::{DefaultStorageConfig, StorageConfig};
use qwen_proxy::error::{ProxyError, Result};
use qwen_proxy::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// 数据目录 (默认 ~/.qwen-proxy)
    #[arg(long, env = "QWEN_PROXY_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动代理服务
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long, env = "QWEN_PROXY_PORT")]
        port: Option<u16>,

        /// 路由策略: default | round-robin | load-balance
        #[arg(long)]
        strategy: Option<RoutingStrategy>,
    },
    /// OAuth 设备码登录，新增一个账户
    Login {
        /// 账户显示名（缺省时自动生成）
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        strategy: None,
    });

    let result = match command {
        Command::Serve {
            host,
            port,
            strategy,
        } => serve(cli.data_dir, host, port, strategy).await,
        Command::Login { name } => login(cli.data_dir, name).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn open_storage(data_dir: Option<PathBuf>) -> Result<Box<dyn StorageConfig>> {
    Ok(match data_dir {
        Some(dir) => Box::new(DefaultStorageConfig::with_path(dir)?),
        None => Box::new(DefaultStorageConfig::new()?),
    })
}

async fn serve(
    data_dir: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    strategy: Option<RoutingStrategy>,
) -> Result<()> {
    let storage = open_storage(data_dir)?;

    // 磁盘配置打底，命令行/环境变量覆盖
    let mut config = ConfigStorage::load(storage.as_ref()).await?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(strategy) = strategy {
        config.routing_strategy = strategy;
    }

    let state = Arc::new(AppState::with_storage(config.clone(), storage)?);

    let store = state.credentials.load().await;
    tracing::info!(
        "Loaded {} accounts ({} enabled)",
        store.accounts.len(),
        store.accounts.values().filter(|a| a.enabled).count()
    );

    let app = build_routes(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port))
        .await
        .map_err(|e| {
            ProxyError::Network(format!("绑定 {}:{} 失败: {}", config.host, config.port, e))
        })?;
    tracing::info!(
        "Server listening on {}:{} (strategy: {:?})",
        config.host,
        config.port,
        config.routing_strategy
    );

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| ProxyError::Network(format!("Server error: {}", e)))?;
    Ok(())
}

async fn login(data_dir: Option<PathBuf>, name: Option<String>) -> Result<()> {
    let storage = open_storage(data_dir)?;
    let oauth_client = OAuthClient::new();
    let credential_store = CredentialStore::new(storage, OAuthClient::new());

    let flow = oauth_client.perform_device_auth_flow(
        |url, user_code| {
            println!("请在浏览器中打开以下地址完成授权:");
            println!();
            println!("  {}", url);
            println!();
            println!("用户码: {}", user_code);
        },
        oauth::DEFAULT_POLL_INTERVAL_MS,
        oauth::DEVICE_FLOW_TIMEOUT_MS,
    );

    // Ctrl-C 取消轮询（挂起点只在 sleep/网络调用上，随时可中断）
    let credentials = tokio::select! {
        result = flow => result?,
        _ = tokio::signal::ctrl_c() => {
            return Err(ProxyError::Auth("Login cancelled".to_string()));
        }
    };

    let name = name.unwrap_or_else(|| {
        format!("account-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"))
    });
    let account = credential_store.add_account(name, credentials).await?;
    println!("登录成功: {} ({})", account.name, account.id);
    Ok(())
}

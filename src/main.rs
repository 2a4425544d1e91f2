use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use desktop_notify_mcp::app::{Config, NotifyChannel};
use desktop_notify_mcp::delivery::{DeliveryAdapter, Severity, Urgency};
use desktop_notify_mcp::mcp::tools::{CLEAR_WAYBAR_MESSAGE, NOTIFY_USER, OVERLAY_STATUS};
use desktop_notify_mcp::mcp::{McpServer, ToolGateway, ToolProfile};

/// Desktop Notify MCP - expose desktop notifications as MCP tools
#[derive(Parser)]
#[command(name = "desktop-notify-mcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (defaults to ~/.config/desktop-notify-mcp/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio (default)
    Serve {
        /// Tool set to expose (overrides the config file)
        #[arg(long, value_enum)]
        profile: Option<ToolProfile>,
    },
    /// Send a notification directly, without an MCP client
    Notify {
        /// Message body
        message: String,
        /// Popup title (defaults to message)
        #[arg(long)]
        title: Option<String>,
        /// Destination; repeatable
        #[arg(long = "channel", value_enum)]
        channels: Vec<NotifyChannel>,
        /// Popup urgency
        #[arg(short, long, value_enum)]
        urgency: Option<Urgency>,
        /// Popup timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Popup icon name or path
        #[arg(long)]
        icon: Option<String>,
        /// Waybar severity
        #[arg(short, long, value_enum)]
        severity: Option<Severity>,
        /// Enable the Waybar pulse animation
        #[arg(long)]
        pulse: bool,
        /// Seconds before the Waybar message is cleared
        #[arg(short, long)]
        duration: Option<u64>,
        /// Waybar text override
        #[arg(long)]
        text: Option<String>,
        /// Waybar tooltip override
        #[arg(long)]
        tooltip: Option<String>,
    },
    /// Restore the Waybar ready state
    Clear,
    /// Check whether the Quickshell overlay target is available
    Status,
    /// Print the tool list as JSON
    Tools {
        #[arg(long, value_enum)]
        profile: Option<ToolProfile>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ログ初期化
    init_logging(&cli.log_level)?;

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            let mut config = Config::default();
            config.apply_env(|name| std::env::var(name).ok());
            config
        }
        Err(e) => return Err(e),
    };

    // 単一スレッドで外部プロセスの終了を待つ
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let adapter = Arc::new(DeliveryAdapter::with_system_runner(&config));
    let gateway = ToolGateway::new(&config, adapter.clone());

    match cli.command {
        Some(Commands::Serve { profile }) => runtime.block_on(serve(gateway, profile)),
        None => runtime.block_on(serve(gateway, None)),
        Some(Commands::Tools { profile }) => {
            let gateway = gateway.with_profile(profile.unwrap_or(config.server.profile));
            println!("{}", serde_json::to_string_pretty(&gateway.list_tools())?);
            Ok(())
        }
        Some(Commands::Notify {
            message,
            title,
            channels,
            urgency,
            timeout_ms,
            icon,
            severity,
            pulse,
            duration,
            text,
            tooltip,
        }) => {
            let mut args = Map::new();
            args.insert("message".into(), json!(message));
            insert_opt(&mut args, "title", title);
            if !channels.is_empty() {
                args.insert("channels".into(), json!(channels));
            }
            insert_opt(&mut args, "urgency", urgency);
            insert_opt(&mut args, "timeoutMs", timeout_ms);
            insert_opt(&mut args, "icon", icon);

            let mut waybar = Map::new();
            insert_opt(&mut waybar, "severity", severity);
            if pulse {
                waybar.insert("pulse".into(), json!(true));
            }
            insert_opt(&mut waybar, "durationSeconds", duration);
            insert_opt(&mut waybar, "text", text);
            insert_opt(&mut waybar, "tooltip", tooltip);
            if !waybar.is_empty() {
                args.insert("waybar".into(), Value::Object(waybar));
            }

            runtime.block_on(async {
                let gateway = gateway.with_profile(ToolProfile::All);
                let outcome = run_tool(&gateway, NOTIFY_USER, Value::Object(args)).await;
                // プロセス終了前にバーを元に戻す
                adapter.wait_pending().await;
                outcome
            })
        }
        Some(Commands::Clear) => runtime.block_on(async {
            let gateway = gateway.with_profile(ToolProfile::All);
            run_tool(&gateway, CLEAR_WAYBAR_MESSAGE, Value::Null).await
        }),
        Some(Commands::Status) => runtime.block_on(async {
            let gateway = gateway.with_profile(ToolProfile::All);
            run_tool(&gateway, OVERLAY_STATUS, Value::Null).await
        }),
    }
}

fn insert_opt<T: serde::Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), json!(value));
    }
}

async fn serve(gateway: ToolGateway, profile: Option<ToolProfile>) -> Result<()> {
    let gateway = match profile {
        Some(profile) => gateway.with_profile(profile),
        None => gateway,
    };
    let mut server = McpServer::new(gateway);
    eprintln!("Desktop Notification MCP Server running on stdio");
    server.run_stdio().await
}

async fn run_tool(gateway: &ToolGateway, name: &str, args: Value) -> Result<()> {
    let result = gateway.call_tool(name, &args).await;
    let text = result.text_content();
    if result.is_error() {
        anyhow::bail!("{}", text.trim_start_matches("Error: "));
    }
    println!("{}", text);
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let log_dir = directories::ProjectDirs::from("", "", "desktop-notify-mcp")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("desktop-notify-mcp"));

    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("desktop-notify-mcp.log"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // stdout はプロトコル用なのでログはファイルへ
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file),
        )
        .init();

    info!("Desktop Notify MCP starting");
    Ok(())
}

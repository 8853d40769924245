use std::{env, process};

use serde_json::Value;
use tracing::{info, warn};

use mcp_conduit::config::Config;
use mcp_conduit::initialize_logging_with_level;
use mcp_conduit::resources::ResourceDescriptor;
use mcp_conduit::server::MCPServer;
use mcp_conduit::tools::{handler_fn, ParamKind, Tool, ToolContent, ToolParameter};
use mcp_conduit::transport::TransportKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments first (before logging to avoid noise)
    let args: Vec<String> = env::args().collect();

    // Handle version flag
    if args.contains(&"--version".to_string()) || args.contains(&"-V".to_string()) {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        process::exit(0);
    }

    // Handle help flag
    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_help();
        process::exit(0);
    }

    let options = CliOptions::parse(&args[1..])?;

    // The config tree supplies the default log level, so it loads before
    // the subscriber goes up; RUST_LOG still wins after that.
    let mut config = match &options.config_path {
        Some(path) => Config::load_from_file(path).await?,
        None => Config::load().await?,
    };
    initialize_logging_with_level(&config.engine.log_level)?;

    info!("🚀 MCP Conduit {} starting", env!("CARGO_PKG_VERSION"));

    let kind = options.transport.unwrap_or(config.server.default_transport);
    if let Some(listen) = &options.listen {
        match kind {
            TransportKind::Stdio => warn!("--listen is ignored for the stdio transport"),
            TransportKind::Tcp => config.server.listen_tcp = listen.clone(),
            TransportKind::Http => config.server.listen_http = listen.clone(),
            TransportKind::WebSocket => config.server.listen_ws = listen.clone(),
        }
    }

    let server = MCPServer::new(config.server_config());
    register_demo_tools(&server);
    register_demo_resources(&server);

    // Ctrl-C drains the accept loop and cancels in-flight connections
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_server.stop().await;
        }
    });

    match kind {
        TransportKind::Stdio => {
            info!("Serving MCP over stdio");
            server.serve_stdio().await?;
        }
        TransportKind::Tcp => {
            info!("Serving MCP over tcp at {}", config.server.listen_tcp);
            server.serve_tcp(&config.server.listen_tcp).await?;
        }
        TransportKind::Http => {
            info!("Serving MCP over http at {}", config.server.listen_http);
            server.serve_http(&config.server.listen_http).await?;
        }
        TransportKind::WebSocket => {
            info!("Serving MCP over websocket at {}", config.server.listen_ws);
            server.serve_ws(&config.server.listen_ws).await?;
        }
    }

    info!("👋 MCP Conduit stopped");
    Ok(())
}

/// Options taken from the command line
struct CliOptions {
    config_path: Option<String>,
    transport: Option<TransportKind>,
    listen: Option<String>,
}

impl CliOptions {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut options = Self {
            config_path: None,
            transport: None,
            listen: None,
        };
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    options.config_path = Some(expect_value(&mut iter, "--config")?);
                }
                "--transport" => {
                    let value = expect_value(&mut iter, "--transport")?;
                    options.transport = Some(parse_transport(&value)?);
                }
                "--listen" => {
                    options.listen = Some(expect_value(&mut iter, "--listen")?);
                }
                other => anyhow::bail!("unknown option '{}' (try --help)", other),
            }
        }
        Ok(options)
    }
}

fn expect_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> anyhow::Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
}

fn parse_transport(value: &str) -> anyhow::Result<TransportKind> {
    match value {
        "stdio" => Ok(TransportKind::Stdio),
        "tcp" => Ok(TransportKind::Tcp),
        "http" => Ok(TransportKind::Http),
        "ws" | "websocket" => Ok(TransportKind::WebSocket),
        other => anyhow::bail!(
            "unknown transport '{}' (expected stdio, tcp, http, or ws)",
            other
        ),
    }
}

/// Tools every build ships so a fresh server has something to call
fn register_demo_tools(server: &MCPServer) {
    let echo = Tool::new(
        "echo",
        "Echo a message back to the caller",
        handler_fn(|args, _context| async move {
            let message = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(vec![ToolContent::text(message)])
        }),
    )
    .with_parameter(
        ToolParameter::new("message", ParamKind::String).with_description("Text to echo back"),
    );

    let add = Tool::new(
        "add",
        "Add two numbers",
        handler_fn(|args, _context| async move {
            let a = args.first().and_then(Value::as_f64).unwrap_or(0.0);
            let b = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
            Ok(vec![ToolContent::text(format!("{}", a + b))])
        }),
    )
    .with_parameter(ToolParameter::new("a", ParamKind::Number).with_description("First addend"))
    .with_parameter(
        ToolParameter::new("b", ParamKind::Number)
            .with_description("Second addend")
            .with_default(serde_json::json!(0)),
    );

    server.tools().register(echo);
    server.tools().register(add);
}

/// Built-in resources describing the running engine
fn register_demo_resources(server: &MCPServer) {
    server.resources().register_text(
        ResourceDescriptor::new("conduit://about", "about")
            .with_description("What this server is")
            .with_mime_type("text/plain"),
        format!(
            "MCP Conduit {}\nA JSON-RPC 2.0 engine speaking the Model Context Protocol.",
            env!("CARGO_PKG_VERSION")
        ),
    );
}

fn print_help() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    println!();
    println!("USAGE:");
    println!("    {} [OPTIONS]", env!("CARGO_PKG_NAME"));
    println!();
    println!("OPTIONS:");
    println!("    -h, --help               Print this help message and exit");
    println!("    -V, --version            Print version information and exit");
    println!("        --config <PATH>      Load configuration from a specific file");
    println!("        --transport <KIND>   Serve stdio, tcp, http, or ws");
    println!("        --listen <ADDR>      Bind address for socket transports");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG         Set logging level (debug, info, warn, error)");
    println!();
    println!("EXAMPLES:");
    println!(
        "    {}                          Serve MCP over stdio",
        env!("CARGO_PKG_NAME")
    );
    println!(
        "    {} --transport tcp          Accept TCP connections",
        env!("CARGO_PKG_NAME")
    );
    println!(
        "    {} --transport ws --listen 0.0.0.0:9272",
        env!("CARGO_PKG_NAME")
    );
}

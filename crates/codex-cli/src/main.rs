//! Codex Online server
//!
//! Usage: `server [<port>] [--rmi]`
//! - `<port>` defaults to 40000
//! - `--rmi` selects the remote-object transport instead of the byte stream

use anyhow::Result;
use codex_core::config::DEFAULT_PORT;
use codex_core::{NetConfig, TransportKind};
use codex_server::{CodexServer, ServerConfig, tally_factory};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const USAGE: &str = "usage: server [<port>] [--rmi]\n\
    \n  <port>   TCP port to listen on (default 40000)\
    \n  --rmi    use the remote-object transport";

/// What the command line asks for
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve { port: u16, transport: TransportKind },
    Usage,
}

/// Parse the arguments after the program name
fn parse_args(args: &[String]) -> Command {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Command::Usage;
    }
    let port = match args.first() {
        None => DEFAULT_PORT,
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) => port,
            Err(_) => return Command::Usage,
        },
    };
    let transport = match args.get(1).map(String::as_str) {
        None => TransportKind::Stream,
        Some("--rmi") => TransportKind::Remote,
        Some(_) => return Command::Usage,
    };
    if args.len() > 2 {
        return Command::Usage;
    }
    Command::Serve { port, transport }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn serve(port: u16, transport: TransportKind) -> Result<()> {
    let config = ServerConfig {
        port,
        transport,
        net: NetConfig::from_env(),
    };
    info!("Codex server starting on port {}", port);
    let server = CodexServer::bind(config, tally_factory()).await?;
    server.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, transport) = match parse_args(&args) {
        Command::Serve { port, transport } => (port, transport),
        Command::Usage => {
            eprintln!("{}", USAGE);
            return Ok(ExitCode::FAILURE);
        }
    };

    init_logging()?;
    serve(port, transport).await?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            parse_args(&[]),
            Command::Serve {
                port: DEFAULT_PORT,
                transport: TransportKind::Stream
            }
        );
    }

    #[test]
    fn test_port_and_transport() {
        assert_eq!(
            parse_args(&args(&["4100"])),
            Command::Serve {
                port: 4100,
                transport: TransportKind::Stream
            }
        );
        assert_eq!(
            parse_args(&args(&["4100", "--rmi"])),
            Command::Serve {
                port: 4100,
                transport: TransportKind::Remote
            }
        );
    }

    #[test]
    fn test_usage_cases() {
        for bad in [
            vec!["--help"],
            vec!["4100", "--help"],
            vec!["port"],
            vec!["70000"],
            vec!["-1"],
            vec!["4100", "--tcp"],
            vec!["4100", "--rmi", "extra"],
        ] {
            assert_eq!(parse_args(&args(&bad)), Command::Usage, "{:?}", bad);
        }
    }
}

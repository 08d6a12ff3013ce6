use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transport mode for the MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// stdio transport (default) - for local MCP clients
    Stdio,
    /// Streamable HTTP transport - for remote/web access
    Stream,
}

/// Initialize logging for the selected transport.
///
/// stdio clients treat any stderr output during the handshake as a broken
/// connection, so stdio mode stays silent unless file logging is requested.
/// Stream mode always logs to stderr and optionally to a file as well.
pub fn init_logging(
    mode: TransportMode,
    log_file: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stderr_layer = match mode {
        TransportMode::Stdio => None,
        TransportMode::Stream => Some(fmt::layer().with_writer(std::io::stderr)),
    };

    let file_layer = match log_file {
        Some(filename) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filename)?;
            Some(fmt::layer().with_writer(file).with_ansi(false))
        }
        None => None,
    };

    if stderr_layer.is_none() && file_layer.is_none() {
        // stdio without --log: no logging initialization at all
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

//! Alpaca Stream Tail Binary
//!
//! Opens the account activity stream and a stock market data stream, then
//! logs every event until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin alpaca-stream-tail
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY` / `ALPACA_SECRET`: Alpaca API key pair, or
//! - `ALPACA_OAUTH_TOKEN`: OAuth token (account stream only)
//!
//! ## Optional
//! - `ALPACA_ENV`: PAPER | LIVE (default: PAPER)
//! - `ALPACA_FEED`: Stock feed - "iex" | "sip" (default: iex)
//! - `ALPACA_STREAM_SYMBOLS`: Comma separated stock symbols (default: AAPL)
//! - `ALPACA_STREAM_CRYPTO`: Comma separated crypto pairs (default: none)
//! - `ALPACA_STREAM_*`: Session tuning, see `StreamsConfig`
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use alpaca_streaming::infrastructure::alpaca::transport::install_crypto_provider;
use alpaca_streaming::infrastructure::telemetry;
use alpaca_streaming::{
    AlpacaStreams, Channel, SessionError, StreamErrorEvent, StreamSession, StreamsConfig,
    init_metrics,
};
use anyhow::Context;
use tokio::signal;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Stock symbols tailed when none are configured.
const DEFAULT_SYMBOLS: &str = "AAPL";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_crypto_provider();
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Alpaca stream tail");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = StreamsConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let oauth = config.credentials.is_oauth();
    let streams = AlpacaStreams::from_config(config);
    let mut sessions = Vec::new();

    let account = streams.account()?;
    watch_session(&account)?;
    account.on_trade_update(|update| {
        tracing::info!(
            event = ?update.event,
            symbol = %update.order.symbol,
            order_id = %update.order.id,
            "Trade update"
        );
    })?;
    account.subscribe_trade_updates()?;
    account.connect()?;
    sessions.push(account);

    if oauth {
        tracing::info!("OAuth credentials cannot open market data streams, tailing account only");
    } else {
        let symbols = symbol_list("ALPACA_STREAM_SYMBOLS", DEFAULT_SYMBOLS);
        let stock = streams.stock()?;
        watch_session(&stock)?;
        stock.on_trade(|trade| {
            tracing::info!(symbol = %trade.symbol, price = %trade.price, size = %trade.size, "Trade");
        })?;
        stock.on_quote(|quote| {
            tracing::debug!(
                symbol = %quote.symbol,
                bid = %quote.bid_price,
                ask = %quote.ask_price,
                "Quote"
            );
        })?;
        stock.subscribe(Channel::Trades, symbols.iter().cloned())?;
        stock.subscribe(Channel::Quotes, symbols)?;
        stock.connect()?;
        sessions.push(stock);

        let pairs = symbol_list("ALPACA_STREAM_CRYPTO", "");
        if !pairs.is_empty() {
            let crypto = streams.crypto()?;
            watch_session(&crypto)?;
            crypto.on_trade(|trade| {
                tracing::info!(symbol = %trade.symbol, price = %trade.price, "Crypto trade");
            })?;
            crypto.on_orderbook(|book| {
                tracing::debug!(
                    symbol = %book.symbol,
                    bids = book.bids.len(),
                    asks = book.asks.len(),
                    "Order book"
                );
            })?;
            crypto.subscribe(Channel::Trades, pairs.iter().cloned())?;
            crypto.subscribe(Channel::Orderbooks, pairs)?;
            crypto.connect()?;
            sessions.push(crypto);
        }
    }

    tracing::info!(sessions = sessions.len(), "Streams started");

    await_shutdown().await;

    let shutdown = futures::future::join_all(sessions.iter().map(|session| session.disconnect()));
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Sessions did not close in time"
        );
    }

    tracing::info!("Alpaca stream tail stopped");
    Ok(())
}

/// Log state changes and errors of a session.
fn watch_session(session: &StreamSession) -> Result<(), SessionError> {
    let flavor = session.flavor();
    session.on_state_change(move |state| {
        tracing::info!(flavor = %flavor, state = %state, "Connection state");
    })?;
    session.on_subscription(move |ack| {
        tracing::info!(flavor = %flavor, channels = ?ack.channels, "Subscriptions confirmed");
    })?;
    session.on_error(move |error: &StreamErrorEvent| {
        tracing::error!(
            flavor = %flavor,
            kind = error.kind.as_str(),
            code = ?error.code,
            message = %error.message,
            "Stream error"
        );
    })
}

/// Comma separated list from the environment.
fn symbol_list(name: &str, default: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// Log the parsed configuration.
fn log_config(config: &StreamsConfig) {
    let endpoints = config.endpoints();
    tracing::info!(
        environment = config.environment.as_str(),
        feed = config.feed.as_str(),
        auto_connect = config.session.auto_connect,
        "Configuration loaded"
    );
    tracing::debug!(
        account_url = %endpoints.account,
        stock_url = %endpoints.stock,
        crypto_url = %endpoints.crypto,
        "WebSocket endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use crisisdesk_core::{
    chat::{CannedBackend, ChatBackend, ChatClient},
    config::Config,
    events::{EventCatalog, Severity},
    geo::{Coordinates, LocationSearch, Nominatim, ReverseGeocoder},
    http_client::HttpClient,
    session::ChatSession,
    stream::StreamEvent,
    weather::{describe_weather_code, OpenMeteo, WeatherProvider},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const OFFLINE_REPLY: &str =
    "Offline mode: no live assistant is connected. Follow local authority guidance.";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "crisisdesk CLI: emergency chat, weather and events",
    long_about = None
)]
struct Cli {
    /// JSON or TOML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant (interactive when no message is given)
    Chat {
        #[arg(short, long, help = "Single message to send")]
        message: Option<String>,
        #[arg(long, help = "Answer from a canned reply instead of the endpoint")]
        offline: bool,
    },
    /// Current weather and daily forecast
    Weather {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// Search places by name
    Search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Name the locality at a position
    Locate {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// List disaster events from the configured catalog
    Events {
        #[arg(long, default_value = "low")]
        min_severity: Severity,
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    cfg.validate()?;
    let http = HttpClient::from_cfg(&cfg.http)?;

    match cli.command {
        Commands::Chat { message, offline } => {
            let backend: Arc<dyn ChatBackend> = if offline {
                Arc::new(CannedBackend::reply(OFFLINE_REPLY))
            } else {
                Arc::new(ChatClient::from_cfg(http, &cfg.chat)?)
            };
            let mut session = ChatSession::new(backend, &cfg.chat, cfg.assembler);
            println!("{}", cfg.chat.greeting);

            match message {
                Some(text) => send_and_print(&mut session, &text).await,
                None => {
                    let mut lines = BufReader::new(tokio::io::stdin()).lines();
                    prompt()?;
                    while let Some(line) = lines.next_line().await? {
                        if line.trim().is_empty() {
                            prompt()?;
                            continue;
                        }
                        send_and_print(&mut session, &line).await;
                        prompt()?;
                    }
                }
            }
        }
        Commands::Weather { lat, lon } => {
            let client = OpenMeteo::new(http, cfg.geo.open_meteo_base.clone());
            let fc = client.forecast(Coordinates::new(lat, lon)?).await?;
            let c = &fc.current;
            println!(
                "now: {:.1}°C, {}% humidity, wind {:.1} km/h, {}",
                c.temperature_c,
                c.humidity_pct,
                c.wind_speed_kmh,
                describe_weather_code(c.weather_code)
            );
            for d in &fc.daily {
                println!(
                    "{}  {:>5.1} / {:>5.1}°C  {:>5.1} mm  {}",
                    d.date,
                    d.temp_min_c,
                    d.temp_max_c,
                    d.precipitation_mm,
                    describe_weather_code(d.weather_code)
                );
            }
        }
        Commands::Search { query, limit } => {
            let client = Nominatim::new(http, cfg.geo.nominatim_base.clone());
            let places = client.search(&query, limit).await?;
            if places.is_empty() {
                eprintln!("no matches");
            }
            for p in places {
                println!("{:.4}, {:.4}  {}", p.coords.lat, p.coords.lon, p.display_name);
            }
        }
        Commands::Locate { lat, lon } => {
            let client = Nominatim::new(http, cfg.geo.nominatim_base.clone());
            match client.locate(Coordinates::new(lat, lon)?).await? {
                Some(name) => println!("{name}"),
                None => println!("unknown location"),
            }
        }
        Commands::Events {
            min_severity,
            region,
        } => {
            let path = cfg
                .events
                .path
                .as_deref()
                .context("no events.path configured")?;
            let catalog = EventCatalog::from_path(path)?;
            for e in catalog.query(min_severity, region.as_deref()) {
                println!(
                    "[{:?}] {} ({}, {}) at {:.3}, {:.3}: {}",
                    e.severity, e.title, e.kind, e.region, e.lat, e.lon, e.description
                );
            }
        }
    }

    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// Send one message, printing deltas as they arrive. Failures print the
/// fallback the session appended and keep the loop alive.
async fn send_and_print(session: &mut ChatSession, text: &str) {
    let mut saw_delta = false;
    let result = session
        .send(text, |ev| {
            if let StreamEvent::DeltaText(txt) = ev {
                saw_delta = true;
                print!("{txt}");
                io::stdout().flush().ok();
            }
        })
        .await;
    if saw_delta {
        println!();
    }
    match result {
        Ok(report) if report.dropped_lines > 0 => {
            eprintln!("[{} malformed lines skipped]", report.dropped_lines);
        }
        Ok(_) => {}
        Err(err) => {
            if let Some(last) = session.transcript().last() {
                println!("{}", last.content);
            }
            eprintln!("[error: {err}]");
        }
    }
}

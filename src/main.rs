//! Stream Scraper CLI
//!
//! Prints exactly one JSON object on stdout; all tracing goes to stderr.

use clap::error::ErrorKind;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stream_scraper::config::{parse_flag, Config};
use stream_scraper::{ErrorResponse, FailureReason, Pipeline, RequestArgs};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "stream-scraper", version, about = "Resolve series episodes into direct stream URLs")]
struct Args {
    /// IMDb identifier (`tt…`)
    #[arg(long)]
    imdb: Option<String>,

    /// TMDb series identifier
    #[arg(long, conflicts_with = "imdb")]
    tmdb: Option<String>,

    #[arg(long)]
    season: Option<u32>,

    #[arg(long)]
    episode: Option<u32>,

    /// Relay mode (`0`/`1`)
    #[arg(long, default_value = "0")]
    mfp: String,

    /// The identifier is a movie
    #[arg(long)]
    movie: bool,

    /// TMDb API key, overrides `TMDB_KEY`
    #[arg(long)]
    tmdb_key: Option<String>,

    /// Verbose tracing on stderr (`0`/`1`)
    #[arg(long)]
    debug: Option<String>,
}

impl Args {
    /// `<externalId>[:<season>:<episode>]` as understood by the pipeline
    fn identifier(&self) -> String {
        let id = match (&self.imdb, &self.tmdb) {
            (Some(imdb), _) => imdb.trim().to_string(),
            (None, Some(tmdb)) => format!("tmdb:{}", tmdb.trim()),
            (None, None) => String::new(),
        };
        match (self.movie, self.season, self.episode) {
            (false, Some(season), Some(episode)) => format!("{id}:{season}:{episode}"),
            _ => id,
        }
    }

    fn request_args(&self, relay: bool) -> RequestArgs {
        RequestArgs {
            id: self.imdb.clone().or_else(|| self.tmdb.clone()),
            season: self.season,
            episode: self.episode,
            relay,
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "warn,stream_scraper=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Write the single result object to stdout
fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!(
            r#"{{"error":"serialization failed: {}","streams":[],"diag":{{"reason":"internal_error"}}}}"#,
            e.to_string().replace('"', "'")
        ),
    }
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            emit(&ErrorResponse::new(e.to_string(), FailureReason::InvalidIdentifier));
            return;
        }
    };

    let mut config = Config::from_env();
    if let Some(key) = args.tmdb_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        config.tmdb_key = Some(key.to_string());
    }
    config.relay = parse_flag(&args.mfp);
    if let Some(debug) = args.debug.as_deref() {
        config.debug = parse_flag(debug);
    }
    init_tracing(config.debug);

    let identifier = args.identifier();
    let request_args = args.request_args(config.relay);
    info!(identifier = %identifier, relay = config.relay, "request received");

    let pipeline = match Pipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "failed to initialise pipeline");
            emit(&ErrorResponse::new(e.to_string(), e.reason()));
            return;
        }
    };

    let task = tokio::spawn(async move { pipeline.run(&identifier).await });
    match task.await {
        Ok(mut response) => {
            response.diag.args = Some(request_args);
            emit(&response);
        }
        Err(e) => {
            error!(error = %e, "pipeline aborted");
            let mut response = ErrorResponse::new(e.to_string(), FailureReason::InternalError);
            response.diag.args = Some(request_args);
            emit(&response);
        }
    }
}

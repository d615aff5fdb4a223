mod model;
mod request;
mod retrieve;
mod sink;
mod twitter;

use crate::request::SearchOptions;
use crate::retrieve::{retrieve, RetrieveError, Summary};
use crate::twitter::v1::TwitterClientV1;
use crate::twitter::v2::TwitterClientV2;
use crate::twitter::{Authentication, Credentials, SearchClient};
use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use tokio::fs;

/// Search Twitter for a query and save the matching tweets to a compressed file
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// The search query
    query: String,
    /// Restrict retrieved tweets to a given language (ISO 639-1, e.g. en)
    #[clap(short, long)]
    lang: Option<String>,
    /// Choose between recent, popular and mixed tweets
    #[clap(short, long = "result_type")]
    result_type: Option<String>,
    /// Number of tweets to retrieve per request (1 to 100, default 15)
    #[clap(short, long)]
    count: Option<u32>,
    /// Total number of tweets to retrieve, over several requests if needed
    #[clap(short, long)]
    total: Option<u64>,
    /// Final date to retrieve tweets until
    #[clap(short, long, value_name = "YYYY-MM-DD")]
    until: Option<String>,
    /// Min tweet ID to retrieve
    #[clap(short, long = "since_id")]
    since_id: Option<u64>,
    /// Max tweet ID to retrieve
    #[clap(short, long = "max_id")]
    max_id: Option<u64>,
    /// Whether to include the entities node (true or false)
    #[clap(short, long = "include_entities")]
    include_entities: Option<String>,
    /// File name to write the results to (".txt.bz2" is added if missing)
    #[clap(short, long)]
    file: Option<String>,
    /// Only retrieve exact query matches
    #[clap(short, long)]
    exact: bool,
    /// Directory to save results in
    #[clap(short, long, default_value = "./tweets")]
    out: PathBuf,
    /// File holding the access token, access token secret, consumer key and
    /// consumer secret, one per line (prompted for if missing)
    #[clap(long, default_value = "./twitter_credentials.txt")]
    credentials: PathBuf,
    /// Use Twitter API 2 recent search with a bearer token
    #[clap(long)]
    api_v2: bool,
    /// Path to the API 2 authentication details file
    #[clap(long, default_value = "./auth.json")]
    auth: PathBuf,
}

impl Args {
    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            query: self.query.clone(),
            count: self.count,
            total: self.total,
            lang: self.lang.clone(),
            result_type: self.result_type.clone(),
            until: self.until.clone(),
            since_id: self.since_id,
            max_id: self.max_id,
            include_entities: self.include_entities.clone(),
            file: self.file.clone(),
            exact: self.exact,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    if let Err(e) = main2().await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn main2() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    // Catch bad options before asking for credentials
    let options = args.search_options();
    options.clone().validate().map_err(RetrieveError::from)?;

    let client = connect(&args).await.map_err(RetrieveError::Authentication)?;
    let summary = retrieve(client.as_ref(), options, &args.out).await?;
    report(&summary);
    Ok(())
}

async fn connect(args: &Args) -> anyhow::Result<Box<dyn SearchClient>> {
    let client: Box<dyn SearchClient> = if args.api_v2 {
        log::info!("Using Twitter API v2");
        let auth = fs::read_to_string(&args.auth)
            .await
            .context("Unable to read auth file")?;
        let auth = serde_json::from_str::<Authentication>(&auth)
            .context("Unable to deserialize auth file")?;
        Box::new(TwitterClientV2::new(&auth)?)
    } else {
        log::info!("Using Twitter API v1.1");
        let credentials = Credentials::load(&args.credentials).await?;
        Box::new(TwitterClientV1::connect(&credentials).await?)
    };
    Ok(client)
}

fn report(summary: &Summary) {
    log::info!(
        "Retrieved {} relevant tweets in {} requests",
        summary.total_fetched,
        summary.pages
    );
    log::info!("Saved to file {}", summary.path.display());
    if let Some(limit) = summary.rate_limit {
        log::info!(
            "Remaining API calls for current time period: {} of {}",
            limit.remaining,
            limit.limit
        );
    }
}

pub mod v1;
pub mod v2;

use crate::model::{RateLimit, Status};
use crate::request::{ResultType, SearchRequest};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::fs;

/// Bearer token for API v2, read from a JSON auth file
#[derive(Deserialize)]
pub struct Authentication {
    pub bearer_token: String,
}

/// User context OAuth secrets for API v1.1
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub access_secret: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("access_secret", &"<redacted>")
            .field("consumer_key", &"<redacted>")
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Parse the four secrets, one per line: access token, access token
    /// secret, consumer key, consumer secret
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut lines = text.lines().map(str::trim);
        let mut next = |name: &str| -> anyhow::Result<String> {
            match lines.next() {
                Some(line) if !line.is_empty() => Ok(line.to_string()),
                _ => bail!("Missing {name} in credentials"),
            }
        };
        Ok(Self {
            access_token: next("access token")?,
            access_secret: next("access token secret")?,
            consumer_key: next("consumer key")?,
            consumer_secret: next("consumer key secret")?,
        })
    }

    /// Read credentials from `path`, or ask for them on the terminal if the
    /// file does not exist
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let text = fs::read_to_string(path)
                .await
                .context("Unable to read credentials file")?;
            return Self::parse(&text)
                .with_context(|| format!("Invalid credentials file: {}", path.display()));
        }
        log::info!(
            "No credentials file at {}, asking instead",
            path.display()
        );
        tokio::task::spawn_blocking(|| {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut answers = String::new();
            for name in [
                "access token",
                "access token secret",
                "consumer key",
                "consumer key secret",
            ] {
                println!("Please enter {name}:");
                io::stdout().flush()?;
                input.read_line(&mut answers)?;
            }
            Self::parse(&answers)
        })
        .await?
    }
}

/// One page worth of search parameters. `max_id` is inclusive: results with
/// an id greater than it are excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub query: String,
    pub count: u32,
    pub lang: Option<String>,
    pub result_type: Option<ResultType>,
    pub until: Option<NaiveDate>,
    pub since_id: Option<u64>,
    pub max_id: Option<u64>,
    pub include_entities: Option<bool>,
}

impl PageQuery {
    pub fn new(request: &SearchRequest, count: u32, max_id: Option<u64>) -> Self {
        Self {
            query: request.query.clone(),
            count,
            lang: request.lang.clone(),
            result_type: request.result_type,
            until: request.until,
            since_id: request.since_id,
            max_id,
            include_entities: request.include_entities,
        }
    }
}

#[async_trait]
pub trait SearchClient {
    /// Run a single search request, returning results newest first
    async fn search(&self, page: &PageQuery) -> anyhow::Result<Vec<Status>>;

    /// Remaining quota for the search endpoint
    async fn rate_limit_status(&self) -> anyhow::Result<RateLimit>;
}

//! Recent search on API v2, authenticated with an app bearer token

use crate::model::{RateLimit, Status};
use crate::request::ResultType;
use crate::twitter::{Authentication, PageQuery, SearchClient};
use anyhow::{bail, Context};
use async_trait::async_trait;
use maplit::hashmap;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

const TIMEOUT_SEC: u64 = 10;
const API_BASE: &str = "https://api.twitter.com/";
/// Recent search rejects `max_results` below this
const MIN_RESULTS: u32 = 10;

pub struct TwitterClientV2 {
    client: Client,
    base: Url,
    last_limit: Mutex<Option<RateLimit>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TwitterResponse<T> {
    Ok(T),
    // Detect the case where the API returns 200, but contains errors
    #[allow(unused)]
    Error {
        errors: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchTweet>,
}

#[derive(Deserialize)]
struct SearchTweet {
    id: String,
    text: String,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

async fn deserialize_response<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
    let status = response.status();
    let text = response.text().await.context("Bad response text")?;
    if !status.is_success() {
        let code = status.as_u16();
        bail!(format!("Response was not successful: {code}\n{text}"))
    }
    let twitter = match serde_json::from_str::<TwitterResponse<T>>(&text) {
        Ok(ok) => ok,
        Err(e) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(pretty) => {
                let pretty = serde_json::to_string_pretty(&pretty).unwrap_or(text);
                bail!(format!(
                    "Unable to deserialize due to: {e}\nContents:\n{pretty}"
                ))
            }
            Err(_) => bail!("Invalid JSON"),
        },
    };
    Ok(match twitter {
        TwitterResponse::Ok(ok) => ok,
        TwitterResponse::Error { .. } => bail!(text),
    })
}

fn header_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let get = |name: &str| -> Option<i64> { headers.get(name)?.to_str().ok()?.parse().ok() };
    Some(RateLimit {
        limit: get("x-rate-limit-limit")?,
        remaining: get("x-rate-limit-remaining")?,
        reset: get("x-rate-limit-reset")?,
    })
}

impl TwitterClientV2 {
    pub fn new(auth: &Authentication) -> anyhow::Result<Self> {
        Self::with_base(auth, Url::from_str(API_BASE)?)
    }

    /// Point the client at a different API host
    pub fn with_base(auth: &Authentication, base: Url) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", auth.bearer_token);
        let value = HeaderValue::from_str(&value).context("Bearer token is not a valid header")?;
        headers.insert(AUTHORIZATION, value);
        Ok(Self {
            client: Client::builder()
                .default_headers(headers)
                .timeout(Duration::from_secs(TIMEOUT_SEC))
                .build()?,
            base,
            last_limit: Mutex::new(None),
        })
    }
}

fn search_query(page: &PageQuery) -> Vec<(&'static str, String)> {
    let query = match &page.lang {
        Some(lang) => format!("{} lang:{lang}", page.query),
        None => page.query.clone(),
    };
    let fields = if page.include_entities == Some(true) {
        "created_at,lang,author_id,entities"
    } else {
        "created_at,lang,author_id"
    };
    let query = hashmap! {
        "query" => query,
        "max_results" => page.count.max(MIN_RESULTS).to_string(),
        "tweet.fields" => fields.to_string(),
    };
    let mut query: Vec<_> = query.into_iter().collect();
    if let Some(since_id) = page.since_id {
        query.push(("since_id", since_id.to_string()));
    }
    // `until_id` is exclusive, `max_id` is not. Nothing lies above u64::MAX
    if let Some(until_id) = page.max_id.and_then(|max_id| max_id.checked_add(1)) {
        query.push(("until_id", until_id.to_string()));
    }
    if let Some(until) = page.until {
        query.push(("end_time", format!("{}T00:00:00Z", until.format("%Y-%m-%d"))));
    }
    match page.result_type {
        Some(ResultType::Recent) => query.push(("sort_order", "recency".to_string())),
        Some(ResultType::Popular) => query.push(("sort_order", "relevancy".to_string())),
        Some(ResultType::Mixed) | None => {}
    }
    query
}

#[async_trait]
impl SearchClient for TwitterClientV2 {
    // https://developer.twitter.com/en/docs/twitter-api/tweets/search/api-reference/get-tweets-search-recent
    async fn search(&self, page: &PageQuery) -> anyhow::Result<Vec<Status>> {
        let url = self.base.join("2/tweets/search/recent")?;
        let response = self
            .client
            .get(url)
            .query(&search_query(page))
            .send()
            .await?;
        if let Some(limit) = header_limit(response.headers()) {
            if let Ok(mut last) = self.last_limit.lock() {
                *last = Some(limit);
            }
        }
        let response = deserialize_response::<SearchResponse>(response)
            .await
            .with_context(|| format!("Recent search for {} failed", page.query))?;
        response
            .data
            .into_iter()
            .map(|tweet| {
                let id = u64::from_str(&tweet.id).context("Couldn't parse tweet id")?;
                Ok(Status {
                    extra: tweet.rest,
                    ..Status::new(id, tweet.text)
                })
            })
            .collect()
    }

    async fn rate_limit_status(&self) -> anyhow::Result<RateLimit> {
        let last = match self.last_limit.lock() {
            Ok(last) => *last,
            Err(_) => bail!("Rate limit state is poisoned"),
        };
        last.context("No rate limit headers have been received yet")
    }
}

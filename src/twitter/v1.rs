use crate::model::{RateLimit, Status};
use crate::twitter::{Credentials, PageQuery, SearchClient};
use anyhow::Context;
use async_trait::async_trait;
use egg_mode::raw::{request_get, response_json, ParamList};
use egg_mode::{KeyPair, Token};
use serde::Deserialize;
use std::collections::HashMap;

const SEARCH_URL: &str = "https://api.twitter.com/1.1/search/tweets.json";
const RATE_LIMIT_URL: &str = "https://api.twitter.com/1.1/application/rate_limit_status.json";
const SEARCH_RESOURCE: &str = "/search/tweets";

pub struct TwitterClientV1 {
    token: Token,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    statuses: Vec<Status>,
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Deserialize)]
struct RateLimitResources {
    #[serde(default)]
    search: HashMap<String, RateLimit>,
}

impl TwitterClientV1 {
    pub fn new(auth: &Credentials) -> Self {
        Self {
            token: Token::Access {
                consumer: KeyPair::new(auth.consumer_key.clone(), auth.consumer_secret.clone()),
                access: KeyPair::new(auth.access_token.clone(), auth.access_secret.clone()),
            },
        }
    }

    /// Build a client and confirm the service accepts its tokens
    pub async fn connect(auth: &Credentials) -> anyhow::Result<Self> {
        let client = Self::new(auth);
        let user = egg_mode::auth::verify_tokens(&client.token)
            .await
            .context("Unable to verify access tokens")?;
        log::info!("Authenticated as @{}", user.response.screen_name);
        Ok(client)
    }
}

#[async_trait]
impl SearchClient for TwitterClientV1 {
    // https://developer.twitter.com/en/docs/twitter-api/v1/tweets/search/api-reference/get-search-tweets
    async fn search(&self, page: &PageQuery) -> anyhow::Result<Vec<Status>> {
        let params = search_params(page)
            .into_iter()
            .fold(ParamList::new(), |params, (key, value)| {
                params.add_param(key, value)
            });
        let request = request_get(SEARCH_URL, &self.token, Some(&params));
        let response = response_json::<SearchResponse>(request)
            .await
            .context("Search request failed")?;
        Ok(response.response.statuses)
    }

    async fn rate_limit_status(&self) -> anyhow::Result<RateLimit> {
        let params = ParamList::new().add_param("resources", "search");
        let request = request_get(RATE_LIMIT_URL, &self.token, Some(&params));
        let response = response_json::<RateLimitResponse>(request)
            .await
            .context("Unable to fetch rate limit status")?;
        search_limit(response.response)
    }
}

fn search_params(page: &PageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("q", page.query.clone()), ("count", page.count.to_string())];
    if let Some(lang) = &page.lang {
        params.push(("lang", lang.clone()));
    }
    if let Some(result_type) = page.result_type {
        params.push(("result_type", result_type.to_string()));
    }
    if let Some(until) = page.until {
        params.push(("until", until.format("%Y-%m-%d").to_string()));
    }
    if let Some(since_id) = page.since_id {
        params.push(("since_id", since_id.to_string()));
    }
    if let Some(max_id) = page.max_id {
        params.push(("max_id", max_id.to_string()));
    }
    if let Some(include_entities) = page.include_entities {
        params.push(("include_entities", include_entities.to_string()));
    }
    params
}

fn search_limit(response: RateLimitResponse) -> anyhow::Result<RateLimit> {
    response
        .resources
        .search
        .get(SEARCH_RESOURCE)
        .copied()
        .context("Rate limit status is missing the search endpoint")
}

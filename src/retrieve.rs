use crate::model::{RateLimit, Status};
use crate::request::{SearchOptions, SearchRequest, ValidationError};
use crate::sink::CompressedSink;
use crate::twitter::{PageQuery, SearchClient};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Authentication failed")]
    Authentication(#[source] anyhow::Error),
    #[error("Search failed after {fetched} results")]
    Service {
        fetched: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("Error whilst writing to {}", .0.display())]
    Output(PathBuf, #[source] io::Error),
}

/// Outcome of a completed retrieval
#[derive(Debug)]
pub struct Summary {
    pub total_fetched: u64,
    pub pages: u64,
    pub path: PathBuf,
    /// Search quota left, if the service reported it
    pub rate_limit: Option<RateLimit>,
}

/// State carried from one page request to the next
#[derive(Debug, Clone, PartialEq, Eq)]
struct RetrievalSession {
    remaining: u64,
    total_fetched: u64,
    page_size: u32,
    /// Lowest id seen so far
    min_seen: Option<u64>,
    /// Inclusive upper bound for the next request
    max_id: Option<u64>,
}

impl RetrievalSession {
    fn new(request: &SearchRequest) -> Self {
        Self {
            remaining: request.total,
            total_fetched: 0,
            page_size: request.page_size,
            min_seen: None,
            max_id: request.max_id,
        }
    }

    fn page_size(&self) -> u32 {
        self.remaining.min(u64::from(self.page_size)) as u32
    }

    fn record(&mut self, status: &Status) {
        if self.min_seen.map_or(true, |min| status.id < min) {
            self.min_seen = Some(status.id);
        }
        self.remaining -= 1;
        self.total_fetched += 1;
    }

    /// Move the boundary below the oldest result seen. Returns false once
    /// nothing older can exist.
    fn advance(&mut self) -> bool {
        match self.min_seen.and_then(|min| min.checked_sub(1)) {
            Some(max_id) => {
                self.max_id = Some(max_id);
                true
            }
            None => false,
        }
    }
}

/// Validate `options`, then page through search results and write them to
/// `<out_dir>/<file>.txt.bz2`.
pub async fn retrieve(
    client: &dyn SearchClient,
    options: SearchOptions,
    out_dir: &Path,
) -> Result<Summary, RetrieveError> {
    let request = options.validate()?;
    retrieve_request(client, &request, out_dir).await
}

pub async fn retrieve_request(
    client: &dyn SearchClient,
    request: &SearchRequest,
    out_dir: &Path,
) -> Result<Summary, RetrieveError> {
    let path = request.output_path(out_dir);
    let mut sink =
        CompressedSink::create(&path).map_err(|e| RetrieveError::Output(path.clone(), e))?;
    let mut session = RetrievalSession::new(request);
    let mut pages = 0;
    log::info!("Retrieving tweets for query {}...", request.query);

    while session.remaining > 0 {
        if session.total_fetched > 0 {
            log::info!("Total tweets parsed: {}", session.total_fetched);
        }
        let page = PageQuery::new(request, session.page_size(), session.max_id);
        log::debug!("Requesting {:?}", page);
        let statuses = client
            .search(&page)
            .await
            .map_err(|source| RetrieveError::Service {
                fetched: session.total_fetched,
                source,
            })?;
        pages += 1;

        let before = session.total_fetched;
        let take = usize::try_from(session.remaining).unwrap_or(usize::MAX);
        for status in statuses.iter().take(take) {
            sink.write_record(status)
                .map_err(|e| RetrieveError::Output(path.clone(), e))?;
            session.record(status);
        }
        if session.total_fetched == before {
            log::debug!("No new results, stopping");
            break;
        }
        if !session.advance() {
            break;
        }
    }

    let path = sink
        .finish()
        .map_err(|e| RetrieveError::Output(path.clone(), e))?;

    let rate_limit = match client.rate_limit_status().await {
        Ok(limit) => Some(limit),
        Err(e) => {
            log::warn!("Unable to check rate limit status: {:#}", e);
            None
        }
    };
    Ok(Summary {
        total_fetched: session.total_fetched,
        pages,
        path,
        rate_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::read_lines;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves results from a fixed, newest first, list of ids, honouring
    /// `max_id` and `count` the way the search endpoint does
    struct FakeTwitter {
        ids: Vec<u64>,
        requests: Mutex<Vec<PageQuery>>,
        /// Fail every request from this (zero based) index on
        fail_from: Option<usize>,
        /// Ignore `max_id` and always return the newest results
        ignore_max_id: bool,
    }

    impl FakeTwitter {
        fn new(ids: impl IntoIterator<Item = u64>) -> Self {
            let mut ids: Vec<_> = ids.into_iter().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            Self {
                ids,
                requests: Mutex::new(Vec::new()),
                fail_from: None,
                ignore_max_id: false,
            }
        }

        fn requests(&self) -> Vec<PageQuery> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchClient for FakeTwitter {
        async fn search(&self, page: &PageQuery) -> anyhow::Result<Vec<Status>> {
            let mut requests = self.requests.lock().unwrap();
            if self.fail_from.map_or(false, |n| requests.len() >= n) {
                bail!("Rate limit exceeded");
            }
            requests.push(page.clone());
            Ok(self
                .ids
                .iter()
                .filter(|id| self.ignore_max_id || page.max_id.map_or(true, |max| **id <= max))
                .take(page.count as usize)
                .map(|id| Status::new(*id, format!("{} #{id}", page.query)))
                .collect())
        }

        async fn rate_limit_status(&self) -> anyhow::Result<RateLimit> {
            Ok(RateLimit {
                limit: 180,
                remaining: 180 - self.requests.lock().unwrap().len() as i64,
                reset: 0,
            })
        }
    }

    fn options(query: &str) -> SearchOptions {
        SearchOptions {
            file: Some("run".to_string()),
            ..SearchOptions::new(query)
        }
    }

    #[tokio::test]
    async fn single_page() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=6);
        let summary = retrieve(
            &twitter,
            SearchOptions {
                count: Some(6),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_fetched, 6);
        assert_eq!(summary.path, dir.path().join("run.txt.bz2"));
        assert_eq!(summary.rate_limit.map(|l| l.remaining), Some(179));
        let lines = read_lines(&summary.path);
        assert_eq!(lines.len(), 6);
        for line in &lines {
            let status: Status = serde_json::from_str(line).unwrap();
            assert!(status.text.starts_with("cats"));
        }
        let requests = twitter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].count, 6);
        assert_eq!(requests[0].max_id, None);
    }

    #[tokio::test]
    async fn pages_of_at_most_one_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=1000);
        let summary = retrieve(
            &twitter,
            SearchOptions {
                total: Some(250),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_fetched, 250);
        assert_eq!(summary.pages, 3);
        let requests = twitter.requests();
        let counts: Vec<_> = requests.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![100, 100, 50]);
        let boundaries: Vec<_> = requests.iter().map(|r| r.max_id).collect();
        assert_eq!(boundaries, vec![None, Some(900), Some(800)]);

        let ids: Vec<u64> = read_lines(&summary.path)
            .iter()
            .map(|l| serde_json::from_str::<Status>(l).unwrap().id)
            .collect();
        assert_eq!(ids, (751..=1000).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn count_sets_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=1000);
        let summary = retrieve(
            &twitter,
            SearchOptions {
                count: Some(20),
                total: Some(60),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_fetched, 60);
        let counts: Vec<_> = twitter.requests().iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![20, 20, 20]);
    }

    #[tokio::test]
    async fn absolute_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=10);
        let file = elsewhere.path().join("escaped").display().to_string();
        let err = retrieve(
            &twitter,
            SearchOptions {
                file: Some(file),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RetrieveError::Validation(ValidationError::InvalidFileName(_))
        ));
        assert!(twitter.requests().is_empty());
        assert!(!elsewhere.path().join("escaped.txt.bz2").exists());
    }

    #[tokio::test]
    async fn stops_when_results_run_out() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=130);
        let summary = retrieve(
            &twitter,
            SearchOptions {
                total: Some(250),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_fetched, 130);
        let requests = twitter.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].max_id, Some(0));
        assert_eq!(read_lines(&summary.path).len(), 130);
    }

    #[tokio::test]
    async fn boundary_excludes_oldest_seen() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new([50, 40, 35, 20, 10]);
        let summary = retrieve(
            &twitter,
            SearchOptions {
                total: Some(6),
                max_id: Some(45),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_fetched, 4);
        let boundaries: Vec<_> = twitter.requests().iter().map(|r| r.max_id).collect();
        assert_eq!(boundaries, vec![Some(45), Some(9)]);
    }

    #[tokio::test]
    async fn duplicate_pages_do_not_exceed_total() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter {
            ignore_max_id: true,
            ..FakeTwitter::new(1..=3)
        };
        let summary = retrieve(
            &twitter,
            SearchOptions {
                total: Some(7),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(summary.total_fetched, 7);
        assert_eq!(twitter.requests().len(), 3);
    }

    #[tokio::test]
    async fn validation_happens_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=10);
        for options in [
            SearchOptions {
                count: Some(101),
                ..options("cats")
            },
            SearchOptions {
                until: Some("20-11-2017".to_string()),
                ..options("cats")
            },
        ] {
            let err = retrieve(&twitter, options, dir.path()).await.unwrap_err();
            assert!(matches!(err, RetrieveError::Validation(_)));
        }
        assert!(twitter.requests().is_empty());
        assert!(!dir.path().join("run.txt.bz2").exists());
    }

    #[tokio::test]
    async fn exact_phrase_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter::new(1..=3);
        retrieve(
            &twitter,
            SearchOptions {
                exact: true,
                ..options("happy cats")
            },
            dir.path(),
        )
        .await
        .unwrap();
        assert_eq!(twitter.requests()[0].query, "\"happy cats\"");
    }

    #[tokio::test]
    async fn service_error_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let twitter = FakeTwitter {
            fail_from: Some(1),
            ..FakeTwitter::new(1..=300)
        };
        let err = retrieve(
            &twitter,
            SearchOptions {
                total: Some(200),
                ..options("cats")
            },
            dir.path(),
        )
        .await
        .unwrap_err();

        match err {
            RetrieveError::Service { fetched, .. } => assert_eq!(fetched, 100),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(read_lines(&dir.path().join("run.txt.bz2")).len(), 100);
    }

    #[test]
    fn session_tracks_minimum() {
        let request = options("cats").validate().unwrap();
        let mut session = RetrievalSession::new(&request);
        assert_eq!(session.page_size(), 15);
        for id in [12, 9, 11] {
            session.record(&Status::new(id, "cats"));
        }
        assert!(session.advance());
        assert_eq!(session.max_id, Some(8));
        assert_eq!(session.remaining, 12);
        assert_eq!(session.total_fetched, 3);

        session.record(&Status::new(0, "cats"));
        assert!(!session.advance());
    }
}

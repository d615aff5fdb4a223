use chrono::NaiveDate;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// The API will not return more than this many results per call
pub const MAX_PAGE_SIZE: u32 = 100;
/// Number of results retrieved when neither a count nor a total is given
pub const DEFAULT_COUNT: u64 = 15;
pub const DEFAULT_FILE_NAME: &str = "tweets.txt.bz2";
pub const FILE_EXTENSION: &str = ".txt.bz2";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Query must not be empty")]
    EmptyQuery,
    #[error("Count must be in range [1, 100], got {0}")]
    CountOutOfRange(u32),
    #[error("Total must be at least 1")]
    ZeroTotal,
    #[error("Invalid result_type: {0} (expected recent, popular or mixed)")]
    InvalidResultType(String),
    #[error("Invalid until date: {0} (expected YYYY-MM-DD)")]
    InvalidUntil(String),
    #[error("Invalid include_entities: {0} (expected true or false)")]
    InvalidIncludeEntities(String),
    #[error("Invalid language code: {0} (expected ISO 639-1, e.g. en)")]
    InvalidLanguage(String),
    #[error("Invalid file name: {0} (expected a plain name without directories)")]
    InvalidFileName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Recent,
    Popular,
    Mixed,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Recent => "recent",
            ResultType::Popular => "popular",
            ResultType::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent" => Ok(ResultType::Recent),
            "popular" => Ok(ResultType::Popular),
            "mixed" => Ok(ResultType::Mixed),
            other => Err(ValidationError::InvalidResultType(other.to_string())),
        }
    }
}

/// Search options as supplied by the user, before any checks are made.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    /// Results per request, 1 to 100
    pub count: Option<u32>,
    /// Results to retrieve in total, across as many requests as needed
    pub total: Option<u64>,
    pub lang: Option<String>,
    pub result_type: Option<String>,
    pub until: Option<String>,
    pub since_id: Option<u64>,
    pub max_id: Option<u64>,
    pub include_entities: Option<String>,
    pub file: Option<String>,
    pub exact: bool,
}

/// A checked search, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// The query as it will be submitted (quoted for exact phrase searches)
    pub query: String,
    pub total: u64,
    /// Results asked for per request, at most 100
    pub page_size: u32,
    pub lang: Option<String>,
    pub result_type: Option<ResultType>,
    pub until: Option<NaiveDate>,
    pub since_id: Option<u64>,
    pub max_id: Option<u64>,
    pub include_entities: Option<bool>,
    /// Output file name, always ending in `.txt.bz2`
    pub file_name: String,
}

impl SearchOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn validate(self) -> Result<SearchRequest, ValidationError> {
        if self.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        if let Some(count) = self.count {
            if !(1..=MAX_PAGE_SIZE).contains(&count) {
                return Err(ValidationError::CountOutOfRange(count));
            }
        }
        if self.total == Some(0) {
            return Err(ValidationError::ZeroTotal);
        }
        let result_type = self
            .result_type
            .as_deref()
            .map(ResultType::from_str)
            .transpose()?;
        let until = self.until.as_deref().map(parse_until).transpose()?;
        let include_entities = match self.include_entities.as_deref() {
            None => None,
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(other) => {
                return Err(ValidationError::InvalidIncludeEntities(other.to_string()))
            }
        };
        if let Some(lang) = &self.lang {
            if lang.len() != 2 || !lang.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ValidationError::InvalidLanguage(lang.clone()));
            }
        }

        let query = if self.exact {
            exact_phrase(&self.query)
        } else {
            self.query
        };
        let file_name = output_file_name(self.file.as_deref())?;
        let total = self
            .total
            .or_else(|| self.count.map(u64::from))
            .unwrap_or(DEFAULT_COUNT);

        Ok(SearchRequest {
            query,
            total,
            page_size: self.count.unwrap_or(MAX_PAGE_SIZE),
            lang: self.lang.map(|l| l.to_ascii_lowercase()),
            result_type,
            until,
            since_id: self.since_id,
            max_id: self.max_id,
            include_entities,
            file_name,
        })
    }
}

impl SearchRequest {
    pub fn output_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(&self.file_name)
    }
}

/// Wrap multi-word queries in quotes so only the exact phrase matches
fn exact_phrase(query: &str) -> String {
    if query.split_whitespace().count() > 1 {
        format!("\"{query}\"")
    } else {
        query.to_string()
    }
}

fn parse_until(until: &str) -> Result<NaiveDate, ValidationError> {
    let invalid = || ValidationError::InvalidUntil(until.to_string());
    let bytes = until.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(until, "%Y-%m-%d").map_err(|_| invalid())
}

/// Results always land directly inside the output directory
fn output_file_name(file: Option<&str>) -> Result<String, ValidationError> {
    let name = match file {
        None => return Ok(DEFAULT_FILE_NAME.to_string()),
        Some(name) => name,
    };
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !plain || name.contains(['/', '\\']) {
        return Err(ValidationError::InvalidFileName(name.to_string()));
    }
    Ok(if name.ends_with(FILE_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{FILE_EXTENSION}")
    })
}

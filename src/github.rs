use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ChangeSetError, ImpactError};

const PER_PAGE: usize = 100;
// the commits endpoint stops listing files after 3000
const MAX_PAGES: usize = 30;

/// Source of the files a commit touched.
pub trait ChangeSetProvider: Send + Sync {
    fn changed_files(&self, commit_id: &str) -> Result<Vec<String>, ChangeSetError>;
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum AuthScheme {
    Bearer,
    /// Older personal access tokens only accept `token <pat>`.
    Token,
}

pub struct GithubClient {
    client: Client,
    api_url: String,
    repo: String,
    token: String,
}

impl GithubClient {
    pub fn new(api_url: &str, repo: &str, token: &str) -> Result<Self, ImpactError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("impactgrep"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ImpactError::ChangeSetUnavailable(ChangeSetError::Network(e.to_string())))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        })
    }

    fn send(&self, url: &str, scheme: AuthScheme) -> Result<Response, ChangeSetError> {
        let value = match scheme {
            AuthScheme::Bearer => format!("Bearer {}", self.token),
            AuthScheme::Token => format!("token {}", self.token),
        };
        self.client
            .get(url)
            .header(AUTHORIZATION, value)
            .send()
            .map_err(|e| ChangeSetError::Network(e.to_string()))
    }

    fn fetch_page(&self, commit_id: &str, page: usize) -> Result<Vec<String>, ChangeSetError> {
        let url = format!(
            "{}/repos/{}/commits/{commit_id}?per_page={PER_PAGE}&page={page}",
            self.api_url, self.repo
        );

        let mut resp = self.send(&url, AuthScheme::Bearer)?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!("bearer credential rejected, retrying with token scheme");
            resp = self.send(&url, AuthScheme::Token)?;
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ChangeSetError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let detail: CommitDetail = resp
            .json()
            .map_err(|e| ChangeSetError::Network(format!("unreadable commit payload: {e}")))?;

        Ok(detail.files.into_iter().filter_map(|f| f.filename).collect())
    }
}

impl ChangeSetProvider for GithubClient {
    fn changed_files(&self, commit_id: &str) -> Result<Vec<String>, ChangeSetError> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let chunk = self.fetch_page(commit_id, page)?;
            let last = chunk.len() < PER_PAGE;
            out.extend(chunk);
            if last {
                break;
            }
        }

        debug!(commit = commit_id, files = out.len(), repo = %self.repo, "fetched change set");
        if out.is_empty() {
            return Err(ChangeSetError::NoFiles(commit_id.to_string()));
        }
        Ok(out)
    }
}

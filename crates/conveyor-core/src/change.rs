//! Change events and source stamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The (repository, branch, revision) tuple a job is built against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceStamp {
    pub repository: String,
    pub branch: String,
    pub revision: String,
}

impl SourceStamp {
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            revision: revision.into(),
        }
    }

    /// Repository short name: the last path segment without `.git`.
    ///
    /// Works for both `https://host/org/repo.git` and `git@host:org/repo`.
    pub fn repo_name(&self) -> &str {
        let trimmed = self.repository.trim_end_matches('/');
        let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
        last.strip_suffix(".git").unwrap_or(last)
    }

    /// `owner/repo` for hosted repositories, if the URL has both segments.
    pub fn full_name(&self) -> Option<String> {
        let trimmed = self.repository.trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        let mut segments = trimmed.rsplit(['/', ':']);
        let repo = segments.next().filter(|s| !s.is_empty())?;
        let owner = segments.next().filter(|s| !s.is_empty())?;
        Some(format!("{}/{}", owner, repo))
    }

    /// Abbreviated revision for human-facing messages.
    pub fn short_revision(&self) -> &str {
        match self.revision.char_indices().nth(8) {
            Some((end, _)) => &self.revision[..end],
            None => &self.revision,
        }
    }
}

/// Pull-request details attached to a change coming from the PR path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    /// `owner/repo` of the head (source) repository.
    pub head_repo: String,
    /// `owner/repo` of the base (target) repository.
    #[serde(default)]
    pub base_repo: Option<String>,
}

/// A change event delivered by a change source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub category: Option<String>,
    pub branch: String,
    pub revision: String,
    pub repository: String,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            category: None,
            branch: branch.into(),
            revision: revision.into(),
            repository: repository.into(),
            pull_request: None,
            author: None,
            comments: None,
            when: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_pull_request(mut self, pull_request: PullRequest) -> Self {
        self.pull_request = Some(pull_request);
        self
    }

    pub fn source_stamp(&self) -> SourceStamp {
        SourceStamp::new(&self.repository, &self.branch, &self.revision)
    }

    /// A pull request whose head lives in the base repository itself.
    ///
    /// Those branches already arrive through the branch path, so only
    /// forked pull requests are built from the PR path.
    pub fn is_same_repo_pull_request(&self, base_repository: &str) -> bool {
        self.pull_request
            .as_ref()
            .is_some_and(|pr| pr.head_repo.eq_ignore_ascii_case(base_repository))
    }
}

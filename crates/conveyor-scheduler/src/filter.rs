//! Change event matching.

use conveyor_core::Result;
use conveyor_core::change::ChangeEvent;
use conveyor_core::config::compile_branch_filter;
use regex::Regex;

/// Category and branch filter of a change scheduler.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    category: Option<String>,
    pattern: String,
    branch: Regex,
}

impl ChangeFilter {
    /// `branch` must match the whole branch name. A `None` category
    /// accepts every category.
    pub fn new(category: Option<String>, branch: &str) -> Result<Self> {
        Ok(Self {
            category,
            pattern: branch.to_string(),
            branch: compile_branch_filter(branch)?,
        })
    }

    pub fn matches(&self, change: &ChangeEvent) -> bool {
        if let Some(category) = &self.category
            && change.category.as_deref() != Some(category.as_str())
        {
            return false;
        }
        self.branch.is_match(&change.branch)
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// True when the change must be dropped by the fork filter.
pub fn is_same_repo_pull_request(change: &ChangeEvent, base_repository: Option<&str>) -> bool {
    match base_repository {
        Some(base) => change.is_same_repo_pull_request(base),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::change::PullRequest;

    fn change(category: Option<&str>, branch: &str) -> ChangeEvent {
        let change = ChangeEvent::new("https://github.com/org/product", branch, "abc");
        match category {
            Some(c) => change.with_category(c),
            None => change,
        }
    }

    #[test]
    fn test_branch_full_match() {
        let filter = ChangeFilter::new(None, "master").unwrap();
        assert!(filter.matches(&change(None, "master")));
        assert!(!filter.matches(&change(None, "master-old")));
        assert!(!filter.matches(&change(None, "old-master")));
    }

    #[test]
    fn test_branch_pattern() {
        let filter = ChangeFilter::new(None, "release/.*|master").unwrap();
        assert!(filter.matches(&change(None, "release/2024.1")));
        assert!(filter.matches(&change(None, "master")));
        assert!(!filter.matches(&change(None, "feature/x")));
    }

    #[test]
    fn test_category() {
        let filter = ChangeFilter::new(Some("mediasdk".into()), ".*").unwrap();
        assert!(filter.matches(&change(Some("mediasdk"), "master")));
        assert!(!filter.matches(&change(Some("driver"), "master")));
        assert!(!filter.matches(&change(None, "master")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ChangeFilter::new(None, "(unclosed").unwrap_err().is_configuration());
    }

    #[test]
    fn test_same_repo_pull_request() {
        let pr = change(None, "feature").with_pull_request(PullRequest {
            number: 7,
            head_repo: "Org/Product".into(),
            base_repo: None,
        });
        assert!(is_same_repo_pull_request(&pr, Some("org/product")));
        assert!(!is_same_repo_pull_request(&pr, None));
        assert!(!is_same_repo_pull_request(&change(None, "master"), Some("org/product")));
    }
}

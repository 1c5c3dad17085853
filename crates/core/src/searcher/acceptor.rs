//! Result filtering against request constraints.

use chrono::Utc;
use tracing::debug;

use super::{ResultItem, SearchRequest};
use std::collections::HashMap;

/// Items that survived filtering plus a tally of why the rest didn't.
#[derive(Debug, Default)]
pub struct AcceptorResult {
    pub accepted: Vec<ResultItem>,
    /// Rejection reason -> count.
    pub rejected: HashMap<String, u32>,
}

impl AcceptorResult {
    pub fn rejected_count(&self) -> u32 {
        self.rejected.values().sum()
    }
}

/// Decides which parsed results are returned to the caller.
pub trait ResultAcceptor: Send + Sync {
    fn accept(&self, items: Vec<ResultItem>, request: &SearchRequest) -> AcceptorResult;
}

/// Applies the request's age and size bounds. Items without a publish
/// date or size pass the respective checks; backends don't always report
/// them and dropping such items would hide most of some backends'
/// output.
#[derive(Debug, Default)]
pub struct StandardAcceptor;

impl StandardAcceptor {
    fn reject_reason(&self, item: &ResultItem, request: &SearchRequest) -> Option<String> {
        if let Some(publish_date) = item.publish_date {
            let age_days = (Utc::now() - publish_date).num_days();
            if let Some(min_age) = request.min_age_days {
                if age_days < min_age as i64 {
                    return Some("too new".to_string());
                }
            }
            if let Some(max_age) = request.max_age_days {
                if age_days > max_age as i64 {
                    return Some("too old".to_string());
                }
            }
        }
        if let Some(size_bytes) = item.size_bytes {
            let size_mb = size_bytes / (1024 * 1024);
            if let Some(min_size) = request.min_size_mb {
                if size_mb < min_size {
                    return Some("too small".to_string());
                }
            }
            if let Some(max_size) = request.max_size_mb {
                if size_mb > max_size {
                    return Some("too big".to_string());
                }
            }
        }
        None
    }
}

impl ResultAcceptor for StandardAcceptor {
    fn accept(&self, items: Vec<ResultItem>, request: &SearchRequest) -> AcceptorResult {
        let mut result = AcceptorResult::default();
        for item in items {
            match self.reject_reason(&item, request) {
                Some(reason) => {
                    debug!(title = %item.title, reason = %reason, "rejected result");
                    *result.rejected.entry(reason).or_insert(0) += 1;
                }
                None => result.accepted.push(item),
            }
        }
        result
    }
}

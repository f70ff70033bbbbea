//! Per-account label id → name resolution

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{LabelInfo, MailboxClient};

/// Mapping from opaque label ids to human-readable names for one account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: HashMap<String, String>,
}

impl LabelMap {
    pub fn from_labels(labels: Vec<LabelInfo>) -> Self {
        Self {
            names: labels.into_iter().map(|l| (l.id, l.name)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Name for an id, or the raw id when it is unknown
    pub fn name_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Resolve a message's label ids, preserving their order
    pub fn resolve(&self, ids: &[String]) -> Vec<String> {
        ids.iter().map(|id| self.name_for(id).to_string()).collect()
    }
}

/// Fetch the label catalog once and build the id → name map.
///
/// A failed or slow fetch degrades to an empty map so messages expose raw ids.
/// `budget` bounds the whole fetch, retries included.
pub async fn resolve_labels(
    account: &str,
    client: &dyn MailboxClient,
    budget: Duration,
) -> LabelMap {
    match tokio::time::timeout(budget, client.list_labels()).await {
        Ok(Ok(labels)) => {
            debug!("Resolved {} labels for account {}", labels.len(), account);
            LabelMap::from_labels(labels)
        }
        Ok(Err(e)) => {
            warn!(
                "Label catalog unavailable for account {}: {}. Falling back to raw label ids",
                account, e
            );
            LabelMap::default()
        }
        Err(_) => {
            warn!(
                "Label catalog for account {} took longer than {:?}. Falling back to raw label ids",
                account, budget
            );
            LabelMap::default()
        }
    }
}

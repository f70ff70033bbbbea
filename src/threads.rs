//! Thread aggregation with category priority rollup

use std::collections::HashMap;

use crate::models::{EmailMessage, EmailThread};

/// Group classified messages into threads.
///
/// Messages without a thread id become single-message threads keyed by their
/// own id. Within a thread messages ascend by timestamp; the thread takes the
/// highest-priority member category. Threads are returned newest first.
pub fn aggregate_threads(messages: &[EmailMessage]) -> Vec<EmailThread> {
    let mut groups: HashMap<&str, Vec<&EmailMessage>> = HashMap::new();
    for message in messages {
        groups.entry(message.thread_key()).or_default().push(message);
    }

    let mut threads: Vec<EmailThread> = groups
        .into_iter()
        .filter_map(|(key, members)| build_thread(key, members))
        .collect();

    threads.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    threads
}

fn build_thread(key: &str, mut members: Vec<&EmailMessage>) -> Option<EmailThread> {
    members.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    let last = (*members.last()?).clone();

    let mut category = last.category;
    let mut reason = last.reason.clone();
    for member in &members {
        if member.category.priority() > category.priority() {
            category = member.category;
            reason = member.reason.clone();
        }
    }

    Some(EmailThread {
        id: key.to_string(),
        subject: last.subject.clone(),
        account: last.account.clone(),
        timestamp: last.timestamp,
        message_count: members.len(),
        messages: members.into_iter().cloned().collect(),
        last_message: last,
        category,
        reason,
    })
}

//! Reconcile optimistic local messages with a reloaded log

use super::types::Message;

/// Merge a reloaded log into the locally held one.
///
/// The reloaded log wins unless the local log is longer and ends with a user
/// message the backend has not persisted yet. In that case the reloaded log is
/// kept through its last assistant message and the local tail after that
/// position is re-appended. Without any reloaded assistant message the local
/// log is kept as is.
pub fn reconcile(local: &[Message], authoritative: Vec<Message>) -> Vec<Message> {
    if !has_unsent_tail(local, &authoritative) {
        return authoritative;
    }
    let Some(last_assistant) = authoritative.iter().rposition(Message::is_assistant) else {
        return local.to_vec();
    };
    let keep = last_assistant + 1;
    let mut merged = authoritative;
    merged.truncate(keep);
    merged.extend(local.iter().skip(keep).cloned());
    merged
}

fn has_unsent_tail(local: &[Message], authoritative: &[Message]) -> bool {
    if local.len() <= authoritative.len() {
        return false;
    }
    let Some(last_local) = local.last().filter(|message| message.is_user()) else {
        return false;
    };
    !authoritative
        .last()
        .is_some_and(|last| last.is_user() && last.content == last_local.content)
}

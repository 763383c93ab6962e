//! Bounded history for persisted conversations.
//!
//! Once a history grows past `delete_trigger` messages it is cut back to the newest
//! `min_keep` non-system messages. The system prompt at index 0 is pinned, and the cut
//! is moved further back whenever it would separate a tool-call request from one of
//! its results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::message::{Message, ToolCallId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningPolicy {
    pub min_keep: usize,
    pub delete_trigger: usize,
}

impl Default for PruningPolicy {
    fn default() -> Self {
        Self { min_keep: 20, delete_trigger: 30 }
    }
}

impl PruningPolicy {
    pub fn new(min_keep: usize, delete_trigger: usize) -> Self {
        Self { min_keep, delete_trigger }
    }
}

/// Prunes `messages` in place and returns how many were discarded.
pub fn prune_messages(messages: &mut Vec<Message>, policy: &PruningPolicy) -> usize {
    if messages.len() <= policy.delete_trigger {
        return 0;
    }

    let pinned = messages.first().is_some_and(Message::is_system);
    let first_candidate = usize::from(pinned);

    let Some(mut boundary) = retention_boundary(messages, first_candidate, policy.min_keep) else {
        return 0;
    };
    boundary = extend_for_tool_pairs(messages, first_candidate, boundary);

    if boundary <= first_candidate {
        return 0;
    }

    let removed = boundary - first_candidate;
    messages.drain(first_candidate..boundary);
    removed
}

/// Index of the oldest message to keep so that `min_keep` non-system messages survive.
/// `None` when the history holds no more than that many.
fn retention_boundary(
    messages: &[Message],
    first_candidate: usize,
    min_keep: usize,
) -> Option<usize> {
    let mut retained = 0usize;
    for index in (first_candidate..messages.len()).rev() {
        if !messages[index].is_system() {
            retained += 1;
        }
        if retained == min_keep {
            return (index > first_candidate).then_some(index);
        }
    }
    None
}

/// Walks the boundary backward until no kept tool result answers a discarded request.
fn extend_for_tool_pairs(
    messages: &[Message],
    first_candidate: usize,
    mut boundary: usize,
) -> usize {
    loop {
        let kept_answers: BTreeSet<&ToolCallId> =
            messages[boundary..].iter().filter_map(Message::tool_call_id).collect();

        let requester = (first_candidate..boundary).find(|&index| {
            messages[index].tool_calls().iter().any(|request| kept_answers.contains(&request.id))
        });

        match requester {
            Some(index) => boundary = index,
            None => return boundary,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{prune_messages, PruningPolicy};
    use crate::domain::conversation::{ConversationState, ThreadId};
    use crate::domain::message::{Message, Role, ToolCallId, ToolCallRequest};

    fn numbered_users(count: usize) -> Vec<Message> {
        (0..count).map(|index| Message::user(format!("m{index}"))).collect()
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(Message::content).collect()
    }

    fn tool_exchange(call_id: &str) -> Vec<Message> {
        vec![
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::new(call_id, "execute_salesforce_soql", json!({}))],
            ),
            Message::tool_result(ToolCallId(call_id.to_owned()), format!("result-{call_id}")),
        ]
    }

    #[test]
    fn below_trigger_is_a_no_op() {
        let mut messages = numbered_users(5);
        let removed = prune_messages(&mut messages, &PruningPolicy::new(2, 5));

        assert_eq!(removed, 0);
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn keeps_the_newest_min_keep_messages_and_the_system_prompt() {
        let mut messages = vec![Message::system("prompt")];
        messages.extend(numbered_users(10));

        let removed = prune_messages(&mut messages, &PruningPolicy::new(3, 6));

        assert_eq!(removed, 7);
        assert_eq!(contents(&messages), vec!["prompt", "m7", "m8", "m9"]);
        assert_eq!(messages[0].role(), Role::System);
    }

    #[test]
    fn boundary_moves_back_to_keep_a_tool_pair_intact() {
        let mut messages = vec![Message::system("prompt")];
        messages.extend(numbered_users(4));
        messages.extend(tool_exchange("c1"));
        messages.push(Message::assistant("done"));

        // Newest two non-system messages are the tool result and the final reply;
        // the request that the result answers must come along.
        let removed = prune_messages(&mut messages, &PruningPolicy::new(2, 4));

        assert_eq!(removed, 4);
        assert_eq!(messages.len(), 4);
        assert!(messages[1].requests_tools());
        assert_eq!(messages[2].tool_call_id().map(ToolCallId::as_str), Some("c1"));
    }

    #[test]
    fn multi_call_request_keeps_every_result() {
        let mut messages = numbered_users(3);
        messages.push(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCallRequest::new("a", "one", json!({})),
                ToolCallRequest::new("b", "two", json!({})),
            ],
        ));
        messages.push(Message::tool_result(ToolCallId("a".to_owned()), "ra"));
        messages.push(Message::tool_result(ToolCallId("b".to_owned()), "rb"));

        prune_messages(&mut messages, &PruningPolicy::new(1, 2));

        assert_eq!(contents(&messages), vec!["", "ra", "rb"]);
    }

    #[test]
    fn pruning_is_idempotent() {
        let policies = [PruningPolicy::new(2, 4), PruningPolicy::new(3, 3), PruningPolicy::new(1, 1)];
        for policy in policies {
            let mut state = ConversationState::new(ThreadId("P1".to_owned()));
            state.pin_system_message("prompt");
            for round in 0..4 {
                state.append(Message::user(format!("q{round}")));
                state.extend(tool_exchange(&format!("c{round}")));
                state.append(Message::assistant(format!("a{round}")));
            }

            state.apply_pruning(&policy);
            let once = state.clone();
            state.apply_pruning(&policy);

            assert_eq!(state, once, "second prune changed the history for {policy:?}");
            assert_eq!(state.system_message_count(), 1);
            assert!(state.current_messages()[0].is_system());
            assert!(state.orphaned_tool_results().is_empty());
        }
    }

    #[test]
    fn history_without_system_prompt_is_pruned_from_the_front() {
        let mut messages = numbered_users(6);
        prune_messages(&mut messages, &PruningPolicy::new(2, 3));

        assert_eq!(contents(&messages), vec!["m4", "m5"]);
    }
}

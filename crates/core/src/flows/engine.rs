use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::message::Role;
use crate::flows::states::{GraphNode, RouteContext, TransitionOutcome, TransitionReason};

pub trait GraphDefinition {
    fn entry(&self) -> GraphNode;
    fn transition(
        &self,
        current: GraphNode,
        context: &RouteContext,
    ) -> Result<TransitionOutcome, GraphTransitionError>;
}

/// The two-node agent graph:
///
/// ```text
/// start -> agent
/// agent -> tools   (latest assistant message has unresolved tool calls)
/// agent -> end     (no unresolved tool calls)
/// tools -> agent   (every requested call resolved)
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct AgentToolsGraph;

impl GraphDefinition for AgentToolsGraph {
    fn entry(&self) -> GraphNode {
        GraphNode::Start
    }

    fn transition(
        &self,
        current: GraphNode,
        context: &RouteContext,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        route_agent_tools(current, context)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphTransitionError {
    #[error("no transition leaves terminal node {0:?}")]
    Terminal(GraphNode),
    #[error("agent node must end on an assistant message, found {found:?}")]
    MissingAssistantReply { found: Option<Role> },
    #[error("cannot return to agent with {count} unresolved tool call(s)")]
    UnresolvedToolCalls { count: usize },
}

pub struct GraphRouter<G> {
    graph: G,
}

impl<G> GraphRouter<G>
where
    G: GraphDefinition,
{
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub fn entry(&self) -> GraphNode {
        self.graph.entry()
    }

    pub fn apply(
        &self,
        current: GraphNode,
        context: &RouteContext,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        self.graph.transition(current, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: GraphNode,
        context: &RouteContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, GraphTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        audit.correlation_id.clone(),
                        "graph.transition_applied",
                        AuditCategory::Graph,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("reason", format!("{:?}", outcome.reason)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        audit.correlation_id.clone(),
                        "graph.transition_rejected",
                        AuditCategory::Graph,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("from", current.as_str())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for GraphRouter<AgentToolsGraph> {
    fn default() -> Self {
        Self::new(AgentToolsGraph)
    }
}

fn route_agent_tools(
    current: GraphNode,
    context: &RouteContext,
) -> Result<TransitionOutcome, GraphTransitionError> {
    use GraphNode::{Agent, End, Start, Tools};

    let (to, reason) = match current {
        Start => (Agent, TransitionReason::Entry),
        Agent => {
            if context.latest_role != Some(Role::Assistant) {
                return Err(GraphTransitionError::MissingAssistantReply {
                    found: context.latest_role,
                });
            }
            if context.unresolved_tool_calls > 0 {
                (Tools, TransitionReason::ToolCallsRequested)
            } else {
                (End, TransitionReason::FinalAnswer)
            }
        }
        Tools => {
            if context.unresolved_tool_calls > 0 {
                return Err(GraphTransitionError::UnresolvedToolCalls {
                    count: context.unresolved_tool_calls,
                });
            }
            (Agent, TransitionReason::ToolCallsResolved)
        }
        End => return Err(GraphTransitionError::Terminal(End)),
    };

    Ok(TransitionOutcome { from: current, to, reason })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::message::Role;
    use crate::flows::engine::{GraphRouter, GraphTransitionError};
    use crate::flows::states::{GraphNode, RouteContext, TransitionReason};

    fn assistant(unresolved: usize) -> RouteContext {
        RouteContext { latest_role: Some(Role::Assistant), unresolved_tool_calls: unresolved }
    }

    #[test]
    fn final_answer_routes_agent_to_end() {
        let router = GraphRouter::default();
        let entered = router.apply(router.entry(), &RouteContext::default()).expect("start -> agent");
        assert_eq!(entered.to, GraphNode::Agent);

        let finished = router.apply(GraphNode::Agent, &assistant(0)).expect("agent -> end");
        assert_eq!(finished.to, GraphNode::End);
        assert_eq!(finished.reason, TransitionReason::FinalAnswer);
        assert!(finished.to.is_terminal());
    }

    #[test]
    fn tool_requests_route_through_tools_and_back() {
        let router = GraphRouter::default();

        let to_tools = router.apply(GraphNode::Agent, &assistant(2)).expect("agent -> tools");
        assert_eq!(to_tools.to, GraphNode::Tools);

        let back = router
            .apply(
                GraphNode::Tools,
                &RouteContext { latest_role: Some(Role::Tool), unresolved_tool_calls: 0 },
            )
            .expect("tools -> agent");
        assert_eq!(back.to, GraphNode::Agent);
    }

    #[test]
    fn tools_cannot_leave_with_pending_calls() {
        let router = GraphRouter::default();
        let error = router
            .apply(
                GraphNode::Tools,
                &RouteContext { latest_role: Some(Role::Tool), unresolved_tool_calls: 1 },
            )
            .expect_err("pending calls block the agent");

        assert_eq!(error, GraphTransitionError::UnresolvedToolCalls { count: 1 });
    }

    #[test]
    fn agent_without_assistant_reply_is_rejected() {
        let router = GraphRouter::default();
        let error = router
            .apply(
                GraphNode::Agent,
                &RouteContext { latest_role: Some(Role::User), unresolved_tool_calls: 0 },
            )
            .expect_err("agent must reply");

        assert!(matches!(error, GraphTransitionError::MissingAssistantReply { .. }));
    }

    #[test]
    fn end_is_terminal() {
        let router = GraphRouter::default();
        assert_eq!(
            router.apply(GraphNode::End, &assistant(0)),
            Err(GraphTransitionError::Terminal(GraphNode::End))
        );
    }

    #[test]
    fn transitions_emit_audit_events() {
        let router = GraphRouter::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some("P1".to_owned()), "turn-7", "agent-runtime");

        router.apply_with_audit(GraphNode::Agent, &assistant(1), &sink, &audit).expect("agent -> tools");
        let _ = router.apply_with_audit(GraphNode::End, &assistant(0), &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "graph.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("tools"));
        assert_eq!(events[1].event_type, "graph.transition_rejected");
        assert_eq!(events[1].thread_id.as_deref(), Some("P1"));
    }
}

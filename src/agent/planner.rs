//! Fallback for unrecognized intents: ask a planner for tool calls and run
//! them against the fixed tool set.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Agent, HandleResult, AGENT_NAME};
use crate::connectors::{Planner, SinkAck, ToolPlan};
use crate::state::AgentState;
use crate::types::{Intent, OutboundReply, TimelineRecord, TimelineStatus};

pub const TOOL_WRITE_TIMELINE: &str = "write_timeline";
pub const TOOL_SEND_MESSAGE: &str = "send_message";

const FALLBACK_REPLY: &str =
    "I can schedule meetings and draft emails. Try \"schedule a meeting with alice@example.com tomorrow at 3pm\".";

const PLANNER_TIMEOUT_REPLY: &str =
    "Sorry, I couldn't work out what to do with that in time. Please try again.";

/// Returns the same plan for every prompt.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    plan: ToolPlan,
}

impl StaticPlanner {
    pub fn new(plan: ToolPlan) -> Self {
        Self { plan }
    }
}

impl Default for StaticPlanner {
    /// Log the message and send a short help reply.
    fn default() -> Self {
        let mut plan = ToolPlan::new();
        plan.insert(TOOL_WRITE_TIMELINE.to_string(), json!({}));
        plan.insert(
            TOOL_SEND_MESSAGE.to_string(),
            json!({ "message": FALLBACK_REPLY }),
        );
        Self { plan }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _prompt: &str) -> ToolPlan {
        self.plan.clone()
    }
}

/// Prompt text handed to the planner.
pub fn build_prompt(text: &str, user_id: &str, state: &AgentState) -> String {
    let state_json = serde_json::to_string(state).unwrap_or_else(|_| "{}".to_string());
    format!(
        "User {user_id} said: {text}\n\
         Conversation state: {state_json}\n\
         Available tools: {TOOL_WRITE_TIMELINE}(action_type, payload, status), \
         {TOOL_SEND_MESSAGE}(message, recipient).\n\
         Respond with a JSON object mapping tool name to parameters."
    )
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn ack_value(ack: SinkAck) -> Value {
    serde_json::to_value(ack).unwrap_or(Value::Null)
}

impl Agent {
    pub(super) async fn run_plan(
        &self,
        state: &mut AgentState,
        text: &str,
        user_id: &str,
    ) -> HandleResult {
        let prompt = build_prompt(text, user_id, state);
        let Some(plan) = self
            .with_deadline("planner", self.planner.plan(&prompt))
            .await
        else {
            return self.planner_timed_out(text, user_id).await;
        };
        log::debug!("planner returned {} tool call(s) for {}", plan.len(), user_id);

        let mut result = HandleResult::new(Intent::General, TimelineStatus::Done);

        // Every turn gets a timeline entry and a reply, planned or not.
        let default_write = json!({});
        let default_send = json!({ "message": FALLBACK_REPLY });
        let write_args = plan.get(TOOL_WRITE_TIMELINE).unwrap_or(&default_write);
        let send_args = plan.get(TOOL_SEND_MESSAGE).unwrap_or(&default_send);

        let ack = self.write_timeline_tool(write_args, text, user_id).await;
        if plan.contains_key(TOOL_WRITE_TIMELINE) {
            result
                .tool_results
                .insert(TOOL_WRITE_TIMELINE.to_string(), ack_value(ack.clone()));
        }
        result.write_timeline = Some(ack);

        let message = str_arg(send_args, "message").unwrap_or(FALLBACK_REPLY);
        let ack = self.send_message_tool(send_args, message, user_id).await;
        if plan.contains_key(TOOL_SEND_MESSAGE) {
            result
                .tool_results
                .insert(TOOL_SEND_MESSAGE.to_string(), ack_value(ack.clone()));
        }
        result.message = Some(message.to_string());
        result.send_message = Some(ack);

        for name in plan
            .keys()
            .filter(|name| *name != TOOL_WRITE_TIMELINE && *name != TOOL_SEND_MESSAGE)
        {
            log::warn!("planner asked for unknown tool '{}'", name);
            result
                .tool_results
                .insert(name.clone(), json!({ "error": format!("Unknown tool {name}") }));
        }

        state.last_output = Some(plan);
        result
    }

    async fn planner_timed_out(&self, text: &str, user_id: &str) -> HandleResult {
        log::warn!("planner gave no plan for {}", user_id);
        let mut result = HandleResult::new(Intent::General, TimelineStatus::Failed);
        result.details = Some("planner timed out".to_string());
        let (timeline, sent) = self
            .send_and_record(
                user_id,
                Intent::General.label(),
                TimelineStatus::Failed,
                PLANNER_TIMEOUT_REPLY,
                json!({ "text": text, "error": "planner_timeout" }),
            )
            .await;
        result.message = Some(PLANNER_TIMEOUT_REPLY.to_string());
        result.write_timeline = Some(timeline);
        result.send_message = Some(sent);
        result
    }

    async fn write_timeline_tool(&self, args: &Value, text: &str, user_id: &str) -> SinkAck {
        let status = args
            .get("status")
            .cloned()
            .and_then(|s| serde_json::from_value::<TimelineStatus>(s).ok())
            .unwrap_or(TimelineStatus::Done);
        let record = TimelineRecord {
            agent_name: str_arg(args, "agent_name").unwrap_or(AGENT_NAME).to_string(),
            action_type: str_arg(args, "action_type")
                .unwrap_or(Intent::General.label())
                .to_string(),
            payload: args
                .get("payload")
                .cloned()
                .unwrap_or_else(|| json!({ "text": text })),
            status,
            meta: Some(
                args.get("meta")
                    .cloned()
                    .unwrap_or_else(|| json!({ "user_id": user_id })),
            ),
        };
        self.append_timeline(&record).await
    }

    async fn send_message_tool(&self, args: &Value, message: &str, user_id: &str) -> SinkAck {
        let reply = OutboundReply {
            recipient: str_arg(args, "recipient").unwrap_or(user_id).to_string(),
            message: message.to_string(),
        };
        self.deliver_reply(&reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Collaborators;
    use crate::connectors::memory::{MemoryCalendar, MemoryMessages, MemoryTimeline, MemoryTransport};
    use crate::types::Config;
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowPlanner;

    #[async_trait]
    impl Planner for SlowPlanner {
        async fn plan(&self, _prompt: &str) -> ToolPlan {
            tokio::time::sleep(Duration::from_secs(120)).await;
            StaticPlanner::default().plan("").await
        }
    }

    fn agent_with(
        planner: Arc<dyn Planner>,
    ) -> (Agent, Arc<MemoryTimeline>, Arc<MemoryMessages>) {
        let timeline = Arc::new(MemoryTimeline::new());
        let messages = Arc::new(MemoryMessages::new());
        let agent = Agent::new(
            &Config::default(),
            Collaborators {
                calendar: Some(Arc::new(MemoryCalendar::new())),
                email: Arc::new(MemoryTransport::new()),
                timeline: timeline.clone(),
                messages: messages.clone(),
                planner,
            },
        );
        (agent, timeline, messages)
    }

    #[test]
    fn test_prompt_carries_text_and_state() {
        let prompt = build_prompt("hello", "u1", &AgentState::default());
        assert!(prompt.starts_with("User u1 said: hello\n"));
        assert!(prompt.contains("Conversation state: {}"));
        assert!(prompt.contains("write_timeline"));
    }

    #[tokio::test]
    async fn test_default_plan_logs_and_replies() {
        let (agent, timeline, messages) = agent_with(Arc::new(StaticPlanner::default()));
        let mut state = AgentState::default();
        let result = agent.run_plan(&mut state, "hello there", "u9").await;

        let records = timeline.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_name, "orchestrator");
        assert_eq!(records[0].action_type, "general");
        assert_eq!(records[0].payload, json!({"text": "hello there"}));
        assert_eq!(records[0].meta, Some(json!({"user_id": "u9"})));

        let delivered = messages.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient, "u9");
        assert_eq!(result.message.as_deref(), Some(FALLBACK_REPLY));
        assert_eq!(result.tool_results.len(), 2);
        assert!(state.last_output.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_stop_siblings() {
        let mut plan = ToolPlan::new();
        plan.insert("aaa_first".to_string(), json!({}));
        plan.insert(
            "send_message".to_string(),
            json!({"message": "hi", "recipient": "ops"}),
        );
        let (agent, timeline, messages) = agent_with(Arc::new(StaticPlanner::new(plan)));
        let mut state = AgentState::default();
        let result = agent.run_plan(&mut state, "x", "u1").await;

        assert_eq!(
            result.tool_results["aaa_first"],
            json!({"error": "Unknown tool aaa_first"})
        );
        assert_eq!(messages.delivered()[0].recipient, "ops");
        assert_eq!(result.message.as_deref(), Some("hi"));

        // No write_timeline in the plan: the default entry is still written.
        let records = timeline.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, json!({"text": "x"}));
        assert!(result.write_timeline.is_some());
        assert!(!result.tool_results.contains_key("write_timeline"));
    }

    #[tokio::test]
    async fn test_plan_without_reply_still_replies() {
        let mut plan = ToolPlan::new();
        plan.insert(
            "write_timeline".to_string(),
            json!({"action_type": "note", "status": "pending"}),
        );
        let (agent, timeline, messages) = agent_with(Arc::new(StaticPlanner::new(plan)));
        let mut state = AgentState::default();
        let result = agent.run_plan(&mut state, "remember this", "u4").await;

        let records = timeline.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action_type, "note");
        assert_eq!(records[0].status, TimelineStatus::Pending);

        let delivered = messages.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient, "u4");
        assert_eq!(delivered[0].message, FALLBACK_REPLY);
        assert_eq!(result.message.as_deref(), Some(FALLBACK_REPLY));
        assert_eq!(result.tool_results.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_plan_gets_default_entry_and_reply() {
        let (agent, timeline, messages) = agent_with(Arc::new(StaticPlanner::new(ToolPlan::new())));
        let mut state = AgentState::default();
        let result = agent.run_plan(&mut state, "hmm", "u2").await;

        assert_eq!(timeline.records().len(), 1);
        assert_eq!(messages.delivered().len(), 1);
        assert_eq!(result.status, TimelineStatus::Done);
        assert!(result.tool_results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_planner_timeout_records_failure_and_replies() {
        let (agent, timeline, messages) = agent_with(Arc::new(SlowPlanner));
        let mut state = AgentState::default();
        let result = agent.run_plan(&mut state, "x", "u1").await;

        assert_eq!(result.status, TimelineStatus::Failed);
        assert_eq!(result.details.as_deref(), Some("planner timed out"));
        assert!(result.tool_results.is_empty());

        let records = timeline.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TimelineStatus::Failed);
        assert_eq!(records[0].action_type, "general");
        assert_eq!(records[0].payload, json!({"text": "x", "error": "planner_timeout"}));

        let delivered = messages.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient, "u1");
        assert_eq!(result.message.as_deref(), Some(PLANNER_TIMEOUT_REPLY));
        assert!(state.last_output.is_none());
    }
}

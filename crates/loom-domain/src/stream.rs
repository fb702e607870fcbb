use serde::{Deserialize, Serialize};

/// Events emitted by an LLM provider while streaming a completion.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "token")]
    Token { text: String },

    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The turn-level external events named in §6: `ProcessTurn`'s streaming
/// variant yields `Token` chunks terminated by `Done` (carrying the same
/// fields as the non-streaming `AlignmentResult`) or `Error`. Only the
/// final response may be streamed this way — never intermediate phases
/// (spec.md §1 Non-goals).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnStreamEvent {
    #[serde(rename = "token")]
    TokenEvent { content: String },
    #[serde(rename = "done")]
    DoneEvent {
        #[serde(flatten)]
        result: Box<crate::turn::AlignmentResult>,
    },
    #[serde(rename = "error")]
    ErrorEvent { code: String, message: String },
}

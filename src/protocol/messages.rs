//! Task message definitions
//!
//! Messages are JSON objects discriminated by `msg_type`. The channel hands
//! them over as raw `serde_json::Value`; [`TaskMessage::from_value`] gives a
//! typed view.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────
// Control Frames
// ─────────────────────────────────────────────────────────────────

/// Keep-alive frames exchanged by the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ping,
    Pong,
}

impl ControlFrame {
    /// Wire encoding of the frame
    pub fn to_json(&self) -> String {
        match self {
            ControlFrame::Ping => r#"{"type":"ping"}"#.to_string(),
            ControlFrame::Pong => r#"{"type":"pong"}"#.to_string(),
        }
    }

    /// Recognize a control frame among delivered messages
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        // A control frame carries nothing but its type
        if value.as_object().map(|o| o.len()) != Some(1) {
            return None;
        }
        match kind {
            "ping" => Some(ControlFrame::Ping),
            "pong" => Some(ControlFrame::Pong),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Task Messages (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// Fields shared by every task message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Seconds since the Unix epoch
    #[serde(default)]
    pub timestamp: f64,
}

/// Progress messages published for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "lowercase")]
pub enum TaskMessage {
    System(SystemMessage),
    Agent(AgentMessage),
    User(UserMessage),
    Tool(ToolMessage),
    Step(StepMessage),
}

impl TaskMessage {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn meta(&self) -> &MessageMeta {
        match self {
            TaskMessage::System(m) => &m.meta,
            TaskMessage::Agent(m) => &m.meta,
            TaskMessage::User(m) => &m.meta,
            TaskMessage::Tool(m) => &m.meta,
            TaskMessage::Step(m) => &m.meta,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TaskMessage::System(_) => "system",
            TaskMessage::Agent(_) => "agent",
            TaskMessage::User(_) => "user",
            TaskMessage::Tool(_) => "tool",
            TaskMessage::Step(_) => "step",
        }
    }
}

/// Severity carried by system messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemLevel {
    #[default]
    Info,
    Warning,
    Success,
    Error,
}

impl SystemLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemLevel::Info => "info",
            SystemLevel::Warning => "warning",
            SystemLevel::Success => "success",
            SystemLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,

    #[serde(rename = "type", default)]
    pub level: SystemLevel,
}

/// Agents that publish progress for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    #[serde(rename = "CoordinatorAgent")]
    Coordinator,
    #[serde(rename = "ModelerAgent")]
    Modeler,
    #[serde(rename = "CoderAgent")]
    Coder,
    #[serde(rename = "WriterAgent")]
    Writer,
    #[serde(rename = "SystemAgent")]
    System,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Coordinator => "CoordinatorAgent",
            AgentType::Modeler => "ModelerAgent",
            AgentType::Coder => "CoderAgent",
            AgentType::Writer => "WriterAgent",
            AgentType::System => "SystemAgent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,

    pub agent_type: AgentType,

    /// Section title, set by the writer agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,

    /// `execute_code` or `search_scholar`
    pub tool_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<Value>>,
}

impl ToolMessage {
    /// Interpreter results, for `execute_code` messages
    ///
    /// Items that do not match a known result shape are skipped.
    pub fn code_outputs(&self) -> Vec<CodeOutput> {
        if self.tool_name != "execute_code" {
            return Vec::new();
        }
        self.output
            .iter()
            .flatten()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }

    /// Citations, for `search_scholar` messages
    pub fn citations(&self) -> Vec<&str> {
        if self.tool_name != "search_scholar" {
            return Vec::new();
        }
        self.output
            .iter()
            .flatten()
            .filter_map(|item| item.as_str())
            .collect()
    }
}

/// One item of code interpreter output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "res_type", rename_all = "lowercase")]
pub enum CodeOutput {
    Stdout {
        #[serde(default)]
        msg: Option<String>,
    },
    Stderr {
        #[serde(default)]
        msg: Option<String>,
    },
    Result {
        #[serde(default)]
        msg: Option<String>,
        /// text, html, markdown, png, jpeg, svg, pdf, latex, json, javascript
        format: String,
    },
    Error {
        #[serde(default)]
        msg: Option<String>,
        name: String,
        value: String,
        traceback: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Agent,
    Tool,
    Task,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Processing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

/// Execution step trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMessage {
    #[serde(flatten)]
    pub meta: MessageMeta,

    pub step_name: String,

    pub step_type: StepType,

    #[serde(default)]
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl fmt::Display for TaskMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = self.meta().content.as_deref().unwrap_or("");

        match self {
            TaskMessage::System(m) => write!(f, "[system/{}] {}", m.level.as_str(), content),
            TaskMessage::Agent(m) => match &m.sub_title {
                Some(title) => write!(f, "[{}] {}: {}", m.agent_type.as_str(), title, content),
                None => write!(f, "[{}] {}", m.agent_type.as_str(), content),
            },
            TaskMessage::User(_) => write!(f, "[user] {}", content),
            TaskMessage::Tool(m) => {
                write!(f, "[tool:{}]", m.tool_name)?;
                for output in m.code_outputs() {
                    match output {
                        CodeOutput::Stdout { msg } | CodeOutput::Stderr { msg } => {
                            write!(f, " {}", msg.unwrap_or_default())?
                        }
                        CodeOutput::Result { format, .. } => write!(f, " <{} result>", format)?,
                        CodeOutput::Error { name, value, .. } => write!(f, " {}: {}", name, value)?,
                    }
                }
                let citations = m.citations();
                if !citations.is_empty() {
                    write!(f, " {} citation(s)", citations.len())?;
                }
                Ok(())
            }
            TaskMessage::Step(m) => write!(f, "[step/{}] {}", m.status.as_str(), m.step_name),
        }
    }
}

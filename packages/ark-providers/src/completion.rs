//! OpenAI-compatible chat completions with tool calling.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};
use ark_config::LlmProviderConfig;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
	Assistant,
	Tool,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::System => "system",
			Self::User => "user",
			Self::Assistant => "assistant",
			Self::Tool => "tool",
		}
	}
}

/// One transcript entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
	pub role: Role,
	pub content: Option<String>,
	/// Only set on assistant messages that requested tools.
	pub tool_calls: Vec<ToolCall>,
	/// Only set on tool result messages.
	pub tool_call_id: Option<String>,
}
impl Message {
	pub fn new(role: Role, content: impl Into<String>) -> Self {
		Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
	}

	pub fn system(content: impl Into<String>) -> Self {
		Self::new(Role::System, content)
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self::new(Role::User, content)
	}

	pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
		Self { role: Role::Assistant, content, tool_calls, tool_call_id: None }
	}

	pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			role: Role::Tool,
			content: Some(content.into()),
			tool_calls: Vec::new(),
			tool_call_id: Some(tool_call_id.into()),
		}
	}

	pub fn to_wire(&self) -> Value {
		let mut wire = serde_json::json!({
			"role": self.role.as_str(),
			"content": self.content,
		});

		if !self.tool_calls.is_empty() {
			wire["tool_calls"] =
				Value::Array(self.tool_calls.iter().map(ToolCall::to_wire).collect());
		}
		if let Some(id) = self.tool_call_id.as_ref() {
			wire["tool_call_id"] = Value::String(id.clone());
		}

		wire
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
	pub id: String,
	pub name: String,
	/// Raw JSON text exactly as the model produced it.
	pub arguments: String,
}
impl ToolCall {
	fn to_wire(&self) -> Value {
		serde_json::json!({
			"id": self.id,
			"type": "function",
			"function": { "name": self.name, "arguments": self.arguments },
		})
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
	pub name: String,
	pub description: String,
	/// JSON Schema of the arguments object.
	pub parameters: Value,
}
impl ToolSpec {
	pub fn to_wire(&self) -> Value {
		serde_json::json!({
			"type": "function",
			"function": {
				"name": self.name,
				"description": self.description,
				"parameters": self.parameters,
			},
		})
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
	pub content: Option<String>,
	pub tool_calls: Vec<ToolCall>,
}

/// Requests one completion. `force_tool` sets `tool_choice` to `required`; without tools neither
/// `tools` nor `tool_choice` is sent. Failures are returned as is, there is no retry.
pub async fn complete(
	cfg: &LlmProviderConfig,
	messages: &[Message],
	tools: &[ToolSpec],
	force_tool: bool,
) -> Result<Completion> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = request_body(cfg, messages, tools, force_tool);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_completion_response(json)
}

fn request_body(
	cfg: &LlmProviderConfig,
	messages: &[Message],
	tools: &[ToolSpec],
	force_tool: bool,
) -> Value {
	let mut body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages.iter().map(Message::to_wire).collect::<Vec<_>>(),
	});

	if !tools.is_empty() {
		body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_wire).collect());
		let tool_choice = if force_tool { "required" } else { "auto" };

		body["tool_choice"] = Value::String(tool_choice.to_string());
	}

	body
}

fn parse_completion_response(json: Value) -> Result<Completion> {
	let message = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.ok_or_else(|| Error::InvalidResponse {
			message: "Completion response is missing choices[0].message.".to_string(),
		})?;
	let content = message
		.get("content")
		.and_then(|c| c.as_str())
		.filter(|c| !c.trim().is_empty())
		.map(str::to_string);
	let mut tool_calls = Vec::new();

	if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
		for call in calls {
			tool_calls.push(parse_tool_call(call)?);
		}
	}

	Ok(Completion { content, tool_calls })
}

fn parse_tool_call(call: &Value) -> Result<ToolCall> {
	let id = call.get("id").and_then(|v| v.as_str()).ok_or_else(|| Error::InvalidResponse {
		message: "Tool call is missing id.".to_string(),
	})?;
	let function = call.get("function").ok_or_else(|| Error::InvalidResponse {
		message: format!("Tool call {id} is missing function."),
	})?;
	let name = function.get("name").and_then(|v| v.as_str()).ok_or_else(|| {
		Error::InvalidResponse { message: format!("Tool call {id} is missing function.name.") }
	})?;
	// Some gateways send arguments as an object instead of a JSON string.
	let arguments = match function.get("arguments") {
		Some(Value::String(raw)) => raw.clone(),
		Some(Value::Null) | None => "{}".to_string(),
		Some(other) => serde_json::to_string(other)?,
	};

	Ok(ToolCall { id: id.to_string(), name: name.to_string(), arguments })
}

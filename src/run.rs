//! Long-running run resources and the operations that act on them.

use crate::error::ClientError;
use crate::executor::{Request, RequestExecutor};
use crate::resource::ResourceRef;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
    Expired,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::InProgress => "in_progress",
            RunState::RequiresAction => "requires_action",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelling => "cancelling",
            RunState::Cancelled => "cancelled",
            RunState::Expired => "expired",
        }
    }

    /// The run will never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled | RunState::Expired
        )
    }

    /// The service is still working; a poller should keep reading.
    pub fn is_in_flight(self) -> bool {
        matches!(self, RunState::Queued | RunState::InProgress | RunState::Cancelling)
    }

    /// Whether an observed change from `self` to `next` is a legal lifecycle step.
    ///
    /// Staying put is always legal. Terminal states are final, a run never goes back
    /// to the queue once started, and a cancelling run may only settle as cancelled,
    /// failed or expired.
    pub fn can_transition_to(self, next: RunState) -> bool {
        if self == next {
            return true;
        }
        match self {
            s if s.is_terminal() => false,
            RunState::InProgress => next != RunState::Queued,
            RunState::Cancelling => {
                matches!(next, RunState::Cancelled | RunState::Failed | RunState::Expired)
            }
            _ => true,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as sent by the service.
    #[serde(default)]
    pub arguments: String,
}

/// A tool invocation the run is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

/// The caller's answer to one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl ToolOutput {
    pub fn new(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { tool_call_id: tool_call_id.into(), output: output.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// What a run in `requires_action` needs from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "submit_tool_outputs", rename_all = "snake_case")]
pub enum RequiredAction {
    SubmitToolOutputs(SubmitToolOutputs),
}

impl RequiredAction {
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            RequiredAction::SubmitToolOutputs(s) => &s.tool_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

/// Snapshot of a run as last reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RunError>,
}

impl Run {
    pub fn new(thread_id: impl Into<String>, id: impl Into<String>, status: RunState) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    /// Address of this run.
    pub fn resource(&self) -> Result<ResourceRef, ClientError> {
        Ok(ResourceRef::run(&self.thread_id, &self.id)?)
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.required_action.as_ref().map(RequiredAction::tool_calls).unwrap_or_default()
    }
}

/// Send `request` and decode the returned run.
pub async fn fetch_run(
    executor: &dyn RequestExecutor,
    request: Request,
) -> Result<Run, ClientError> {
    Ok(executor.execute(request).await?.decode::<Run>()?.payload)
}

/// `POST {thread}/runs` with `params` as the body.
pub fn create_run_request(thread: &ResourceRef, params: Value) -> Request {
    Request::execute(thread.clone(), "runs").with_payload(params)
}

/// `POST {run}/cancel`.
pub fn cancel_run_request(run: &ResourceRef) -> Request {
    Request::execute(run.clone(), "cancel")
}

/// `POST {run}/submit_tool_outputs`, optionally asking for an event stream back.
pub fn submit_tool_outputs_request(
    run: &ResourceRef,
    outputs: &[ToolOutput],
    stream: bool,
) -> Request {
    let mut body = json!({ "tool_outputs": outputs });
    if stream {
        body["stream"] = Value::Bool(true);
    }
    Request::execute(run.clone(), "submit_tool_outputs").with_payload(body)
}

/// Start a run on `thread`; `params` is forwarded as the request body.
pub async fn create_run(
    executor: &dyn RequestExecutor,
    thread: &ResourceRef,
    params: Value,
) -> Result<Run, ClientError> {
    fetch_run(executor, create_run_request(thread, params)).await
}

pub async fn retrieve_run(
    executor: &dyn RequestExecutor,
    run: &ResourceRef,
) -> Result<Run, ClientError> {
    fetch_run(executor, Request::read(run.clone())).await
}

/// Ask the service to cancel `run`. The returned snapshot is usually `cancelling`.
pub async fn cancel_run(
    executor: &dyn RequestExecutor,
    run: &ResourceRef,
) -> Result<Run, ClientError> {
    fetch_run(executor, cancel_run_request(run)).await
}

/// Resume a run in `requires_action` with the caller's tool outputs.
pub async fn submit_tool_outputs(
    executor: &dyn RequestExecutor,
    run: &ResourceRef,
    outputs: &[ToolOutput],
) -> Result<Run, ClientError> {
    fetch_run(executor, submit_tool_outputs_request(run, outputs, false)).await
}

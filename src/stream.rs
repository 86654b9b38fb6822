//! Push-based run updates decoded from a server-sent event body.
//!
//! An [`UpdateStream`] is single-pass: it ends after [`StreamUpdate::Done`], after
//! [`StreamUpdate::RequiredAction`] (the run is waiting on the caller, who must submit tool
//! outputs and open a new stream or resume polling), or when the server closes the
//! connection. Events it does not know are skipped.
//!
//! Cancelling the stream's token yields a single [`ClientError::Cancelled`] and closes the
//! body; dropping the stream closes it as well.

use crate::error::{ClientError, Failure, ProtocolError};
use crate::executor::{Request, RequestExecutor};
use crate::resource::ResourceRef;
use crate::run::{create_run_request, submit_tool_outputs_request, Run, ToolOutput};
use crate::sse::{SseEvent, SseParser};
use crate::transport::{BodyStream, TransportError};
use futures::Stream;
use pin_project::pin_project;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Incremental message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub id: String,
    #[serde(default)]
    pub delta: Value,
}

impl MessageDelta {
    /// Concatenated text fragments of this delta.
    pub fn text(&self) -> String {
        self.delta["content"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|part| part["text"]["value"].as_str())
            .collect()
    }
}

/// Server-reported error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// One decoded update. Match on the variant; payload shapes differ per tag.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    RunCreation(Run),
    /// The run needs tool outputs. Last update of the stream.
    RequiredAction(Run),
    Delta(MessageDelta),
    /// Any other `thread.run.*` lifecycle event.
    RunStatus { event: String, run: Run },
    Error(StreamError),
    Done,
}

impl StreamUpdate {
    /// No further updates follow this one.
    pub fn is_final(&self) -> bool {
        matches!(self, StreamUpdate::Done | StreamUpdate::RequiredAction(_))
    }
}

fn json<T: serde::de::DeserializeOwned>(event: &SseEvent) -> Result<T, ProtocolError> {
    serde_json::from_str(&event.data)
        .map_err(|e| ProtocolError::Malformed(format!("`{}` event: {e}", event.name())))
}

fn stream_error(event: &SseEvent) -> StreamError {
    match serde_json::from_str::<Value>(&event.data) {
        Ok(value) => {
            let body = value.get("error").unwrap_or(&value);
            match serde_json::from_value::<StreamError>(body.clone()) {
                Ok(err) => err,
                Err(_) => StreamError { code: None, message: body.to_string() },
            }
        }
        Err(_) => StreamError { code: None, message: event.data.clone() },
    }
}

/// Map one event to an update; `Ok(None)` means skip.
pub fn decode_event(event: &SseEvent) -> Result<Option<StreamUpdate>, ProtocolError> {
    if event.data.trim() == "[DONE]" {
        return Ok(Some(StreamUpdate::Done));
    }
    let update = match event.name() {
        "done" => StreamUpdate::Done,
        "error" => StreamUpdate::Error(stream_error(event)),
        "thread.run.created" => StreamUpdate::RunCreation(json(event)?),
        "thread.run.requires_action" => StreamUpdate::RequiredAction(json(event)?),
        "thread.message.delta" => StreamUpdate::Delta(json(event)?),
        name if name.starts_with("thread.run.") && !name.starts_with("thread.run.step.") => {
            StreamUpdate::RunStatus { event: name.to_string(), run: json(event)? }
        }
        other => {
            tracing::debug!(event = other, "skipping stream event");
            return Ok(None);
        }
    };
    Ok(Some(update))
}

/// Decoded stream of [`StreamUpdate`]s over an event-stream body.
///
/// Not `Unpin`; pin it (`Box::pin` or `std::pin::pin!`) before calling `StreamExt::next`.
#[pin_project]
pub struct UpdateStream {
    body: BodyStream,
    #[pin]
    cancelled: Option<WaitForCancellationFutureOwned>,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    body_done: bool,
    finished: bool,
}

impl std::fmt::Debug for UpdateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStream")
            .field("pending", &self.pending.len())
            .field("body_done", &self.body_done)
            .field("finished", &self.finished)
            .finish()
    }
}

impl UpdateStream {
    /// Open `request` as an event stream. The request's cancellation token, if any, also
    /// governs the returned stream.
    pub async fn open(
        executor: &dyn RequestExecutor,
        request: Request,
    ) -> Result<Self, ClientError> {
        let cancel = request.cancellation.clone();
        let response = executor.open_stream(request).await?;
        Ok(Self::from_body(response.body, cancel))
    }

    pub fn from_body(body: BodyStream, cancel: Option<CancellationToken>) -> Self {
        Self {
            body,
            cancelled: cancel.map(CancellationToken::cancelled_owned),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            body_done: false,
            finished: false,
        }
    }
}

impl Stream for UpdateStream {
    type Item = Result<StreamUpdate, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        if let Some(cancelled) = this.cancelled.as_mut().as_pin_mut() {
            if cancelled.poll(cx).is_ready() {
                *this.finished = true;
                return Poll::Ready(Some(Err(ClientError::Cancelled)));
            }
        }

        loop {
            while let Some(event) = this.pending.pop_front() {
                match decode_event(&event) {
                    Ok(None) => continue,
                    Ok(Some(update)) => {
                        if update.is_final() {
                            *this.finished = true;
                            this.pending.clear();
                        }
                        return Poll::Ready(Some(Ok(update)));
                    }
                    Err(e) => {
                        *this.finished = true;
                        return Poll::Ready(Some(Err(e.into())));
                    }
                }
            }
            if *this.body_done {
                *this.finished = true;
                return Poll::Ready(None);
            }
            match ready!(this.body.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.pending.extend(this.parser.push(&chunk)),
                Some(Err(TransportError::Closed(_))) | None => {
                    *this.body_done = true;
                    this.pending.extend(this.parser.finish());
                }
                Some(Err(e)) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(Failure::transient(e.to_string()).into())));
                }
            }
        }
    }
}

/// Start a run on `thread` and stream its updates.
pub async fn stream_run(
    executor: &dyn RequestExecutor,
    thread: &ResourceRef,
    mut params: Value,
    cancel: Option<CancellationToken>,
) -> Result<UpdateStream, ClientError> {
    if let Value::Object(map) = &mut params {
        map.insert("stream".into(), Value::Bool(true));
    }
    let mut request = create_run_request(thread, params);
    request.cancellation = cancel;
    UpdateStream::open(executor, request).await
}

/// Submit tool outputs for a run in `requires_action` and stream what follows.
pub async fn stream_tool_outputs(
    executor: &dyn RequestExecutor,
    run: &ResourceRef,
    outputs: &[ToolOutput],
    cancel: Option<CancellationToken>,
) -> Result<UpdateStream, ClientError> {
    let mut request = submit_tool_outputs_request(run, outputs, true);
    request.cancellation = cancel;
    UpdateStream::open(executor, request).await
}

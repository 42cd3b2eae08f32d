//! Body interceptor plugging the transform into a streaming message body.
//!
//! ```text
//! Accumulating --end--> Finalizing --ok--> Emitted
//!                                  \--err-> Failed
//! ```
//!
//! An interceptor created for the phase its policy is not scoped to starts in
//! [`InterceptorState::PassingThrough`] and forwards chunks unchanged.
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{
    HeaderMap, HeaderValue, StatusCode,
    header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
};

use crate::{
    config::{FailureMode, PolicyScope},
    core::{context::RequestContext, error::PolicyError, policy::XsltPolicy},
    ports::body_stream::{BodySink, BodySinkError},
    tracing_setup::create_transform_span,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    PassingThrough,
    Accumulating,
    Finalizing,
    Emitted,
    Failed,
}

/// Status line and headers of the message whose body is intercepted.
#[derive(Debug, Clone, Default)]
pub struct MessageHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl MessageHead {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self { status, headers }
    }

    /// Replace the framing headers for a fixed-length body of `length` bytes.
    fn set_fixed_length(&mut self, length: usize) {
        self.headers.remove(TRANSFER_ENCODING);
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
}

fn sink_error(e: BodySinkError) -> PolicyError {
    match e {
        BodySinkError::Closed => PolicyError::StreamClosed,
        other => PolicyError::Downstream(other.to_string()),
    }
}

/// Per-message state machine; never shared between messages.
pub struct BodyInterceptor<S: BodySink> {
    policy: Arc<XsltPolicy>,
    context: RequestContext,
    sink: S,
    state: InterceptorState,
    buffer: BytesMut,
}

impl<S: BodySink> BodyInterceptor<S> {
    pub fn new(policy: Arc<XsltPolicy>, phase: PolicyScope, context: RequestContext, sink: S) -> Self {
        let state = if policy.applies_to(phase) {
            InterceptorState::Accumulating
        } else {
            InterceptorState::PassingThrough
        };
        Self {
            policy,
            context,
            sink,
            state,
            buffer: BytesMut::new(),
        }
    }

    pub fn state(&self) -> InterceptorState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Accept the next body chunk.
    pub fn write(&mut self, chunk: Bytes) -> Result<(), PolicyError> {
        match self.state {
            InterceptorState::PassingThrough => self.sink.write(chunk).map_err(sink_error),
            InterceptorState::Accumulating => {
                let limit = self.policy.max_body_size();
                if self.buffer.len() + chunk.len() > limit {
                    self.fail();
                    return Err(PolicyError::BodyTooLarge { limit });
                }
                self.buffer.extend_from_slice(&chunk);
                Ok(())
            }
            _ => Err(PolicyError::StreamClosed),
        }
    }

    /// Signal the end of the body, transforming and emitting the buffered content.
    ///
    /// On success the framing headers in `head` describe the emitted body. A
    /// failed transform never emits the original body: under
    /// [`FailureMode::Propagate`] the error is returned, under
    /// [`FailureMode::Inline`] the error text is emitted with status 500.
    pub fn end(&mut self, head: &mut MessageHead) -> Result<(), PolicyError> {
        match self.state {
            InterceptorState::PassingThrough => return self.sink.end().map_err(sink_error),
            InterceptorState::Accumulating => {}
            _ => return Err(PolicyError::StreamClosed),
        }

        self.state = InterceptorState::Finalizing;
        tracing::debug!(
            scope = %self.policy.scope(),
            body_bytes = self.buffer.len(),
            "Finalizing XSLT transformation"
        );
        let body = self.buffer.split().freeze();

        let span = create_transform_span(self.policy.scope());
        let result = span.in_scope(|| self.policy.transform(&self.context, &body));
        match result {
            Ok(output) => {
                span.record("output_bytes", output.len());
                head.set_fixed_length(output.len());
                if let Some(content_type) = self.policy.content_type() {
                    head.headers.insert(CONTENT_TYPE, content_type.clone());
                }
                if let Err(e) = self.emit(output) {
                    self.fail();
                    return Err(e);
                }
                self.state = InterceptorState::Emitted;
                tracing::debug!(scope = %self.policy.scope(), "Emitted transformed body");
                Ok(())
            }
            Err(e) => {
                self.fail();
                match self.policy.failure_mode() {
                    FailureMode::Propagate => Err(PolicyError::Transform(e)),
                    FailureMode::Inline => {
                        let message = Bytes::from(e.to_string());
                        head.status = StatusCode::INTERNAL_SERVER_ERROR;
                        head.set_fixed_length(message.len());
                        head.headers
                            .insert(CONNECTION, HeaderValue::from_static("close"));
                        head.headers.insert(
                            CONTENT_TYPE,
                            HeaderValue::from_static("text/plain; charset=utf-8"),
                        );
                        self.emit(message)
                    }
                }
            }
        }
    }

    fn emit(&mut self, body: Bytes) -> Result<(), PolicyError> {
        self.sink.write(body).map_err(sink_error)?;
        self.sink.end().map_err(sink_error)
    }

    fn fail(&mut self) {
        self.state = InterceptorState::Failed;
        self.buffer.clear();
        tracing::debug!(scope = %self.policy.scope(), "XSLT transformation failed");
    }
}

//! Axum integration of the XSLT policy.
//!
//! [`xslt_middleware`] is attached with `axum::middleware::from_fn_with_state`
//! and an `Arc<XsltPolicy>`. The body of the scoped direction is streamed frame
//! by frame into a [`BodyInterceptor`](crate::core::interceptor::BodyInterceptor),
//! and the message is rebuilt from the interceptor's output and fixed-up
//! headers. The other direction is not touched.
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use http_body_util::BodyExt;
use tracing::Instrument;

use crate::{
    adapters::buffered_body::BufferedBody,
    config::PolicyScope,
    core::{
        context::RequestContext,
        error::PolicyError,
        interceptor::{InterceptorState, MessageHead},
        policy::XsltPolicy,
    },
};

/// What the interceptor produced for one message body.
struct Intercepted {
    body: Bytes,
    failed: bool,
}

async fn intercept_body(
    policy: &Arc<XsltPolicy>,
    phase: PolicyScope,
    context: RequestContext,
    mut body: Body,
    head: &mut MessageHead,
) -> Result<Intercepted, PolicyError> {
    let mut interceptor = policy.intercept(phase, context, BufferedBody::new());

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| PolicyError::BodyRead(e.to_string()))?;
        if let Ok(data) = frame.into_data() {
            interceptor.write(data)?;
        }
    }
    interceptor.end(head)?;

    let failed = interceptor.state() == InterceptorState::Failed;
    Ok(Intercepted {
        body: interceptor.into_sink().to_bytes(),
        failed,
    })
}

/// Apply the policy's stylesheet to the request or response body.
pub async fn xslt_middleware(
    State(policy): State<Arc<XsltPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    let context = RequestContext::from_request(&req);
    let span = tracing::debug_span!(
        "xslt",
        scope = %policy.scope(),
        method = %context.method,
        path = %context.path
    );
    transform_exchange(policy, context, req, next)
        .instrument(span)
        .await
}

async fn transform_exchange(
    policy: Arc<XsltPolicy>,
    context: RequestContext,
    req: Request,
    next: Next,
) -> Response {
    if !policy.applies_to(PolicyScope::Request) {
        let response = next.run(req).await;
        return transform_response(&policy, context, response).await;
    }

    let (mut parts, body) = req.into_parts();
    let mut head = MessageHead::new(StatusCode::OK, std::mem::take(&mut parts.headers));
    match intercept_body(&policy, PolicyScope::Request, context, body, &mut head).await {
        Ok(intercepted) if intercepted.failed => {
            // Inline failure answers directly; the error text never goes upstream
            let mut response = Response::new(Body::from(intercepted.body));
            *response.status_mut() = head.status;
            *response.headers_mut() = head.headers;
            response
        }
        Ok(intercepted) => {
            parts.headers = head.headers;
            next.run(Request::from_parts(parts, Body::from(intercepted.body)))
                .await
        }
        Err(e) => {
            tracing::warn!(error = %e, "XSLT request transformation failed");
            e.into_response()
        }
    }
}

async fn transform_response(
    policy: &Arc<XsltPolicy>,
    context: RequestContext,
    response: Response,
) -> Response {
    if !policy.applies_to(PolicyScope::Response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let mut head = MessageHead::new(parts.status, std::mem::take(&mut parts.headers));
    match intercept_body(policy, PolicyScope::Response, context, body, &mut head).await {
        Ok(intercepted) => {
            parts.status = head.status;
            parts.headers = head.headers;
            Response::from_parts(parts, Body::from(intercepted.body))
        }
        Err(e) => {
            tracing::warn!(error = %e, "XSLT response transformation failed");
            e.into_response()
        }
    }
}

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Arrival time of a redirect request, reported back in the timing headers
#[derive(Copy, Clone)]
pub struct RequestStart(pub Instant);

impl RequestStart {
    pub fn elapsed_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

pub async fn record_request_start(mut request: Request<Body>, next: Next) -> Response {
    // An outer layer may already have stamped the request
    if request.extensions().get::<RequestStart>().is_none() {
        request
            .extensions_mut()
            .insert(RequestStart(Instant::now()));
    }
    next.run(request).await
}

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use httpflow::RequestContext;
use httpflow::prelude::{Client, Error, Interceptor, RedirectPolicy, from_fn, interceptor};

struct TraceInterceptor;

impl Interceptor for TraceInterceptor {
    fn on_request(&self, _context: &RequestContext, headers: &mut http::HeaderMap) {
        headers.insert(
            HeaderName::from_static("x-sdk-trace"),
            HeaderValue::from_static("httpflow-example"),
        );
    }

    fn on_response(
        &self,
        context: &RequestContext,
        status: http::StatusCode,
        _headers: &http::HeaderMap,
    ) {
        println!(
            "response: method={} uri={} status={}",
            context.method(),
            context.uri(),
            status,
        );
    }

    fn on_error(&self, context: &RequestContext, error: &Error) {
        eprintln!(
            "error: method={} uri={} code={} err={error}",
            context.method(),
            context.uri(),
            error.code().as_str(),
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bearer = from_fn(|request, next| {
        request.headers_mut().insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer demo-token"),
        );
        next(request)
    });

    let client = Client::builder()
        .base_url("https://httpbin.org/")
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(8))
        .redirect_policy(RedirectPolicy::limited(5))
        .middleware(interceptor(Arc::new(TraceInterceptor)))
        .middleware(bearer)
        .build()?;

    let mut view = client
        .get("redirect-to")
        .query("url", ["/get"])
        .query("status_code", ["307"])
        .response_view()?;
    println!("final status={}", view.status_code());
    println!("final body={:?}", view.body_json_map()?);
    Ok(())
}

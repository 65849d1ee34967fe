use crate::Result;
use crate::request::Request;
use crate::response::Response;

/// Sends a finished request and returns the response. This is the innermost handler of every
/// middleware chain.
///
/// Implementations may block, and should honor the request's [`Context`](crate::Context).
pub trait Dispatcher: Send + Sync {
    fn send(&self, request: &mut Request) -> Result<Response>;
}

impl<F> Dispatcher for F
where
    F: Fn(&mut Request) -> Result<Response> + Send + Sync,
{
    fn send(&self, request: &mut Request) -> Result<Response> {
        self(request)
    }
}

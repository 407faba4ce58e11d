use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Serves `/health` (always ok while the process is up) and `/ready`, which
/// reflects the `is_ready` probe supplied by the owning service.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();

        Box::pin(async move { Ok(admin_response(req.uri().path(), is_ready)) })
    }
}

fn admin_response<E: 'static>(path: &str, is_ready: bool) -> Response<BoxBody<Bytes, E>> {
    let ok_body = || Full::new(Bytes::from("ok\n")).map_err(|e| match e {}).boxed();

    match path {
        "/health" => Response::new(ok_body()),
        "/ready" => match is_ready {
            true => Response::new(ok_body()),
            false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        },
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn test_admin_routes() {
        let health = admin_response::<Infallible>("/health", false);
        assert_eq!(health.status(), StatusCode::OK);

        let ready = admin_response::<Infallible>("/ready", true);
        assert_eq!(ready.status(), StatusCode::OK);

        let not_ready = admin_response::<Infallible>("/ready", false);
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);

        let unknown = admin_response::<Infallible>("/metrics", true);
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}

use crate::http::{ResponseBody, make_error_response, make_response};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::Service;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Readiness flag shared between the workers that own the process lifecycle
/// and the admin endpoint. Starts out not ready.
#[derive(Clone, Debug, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serves `/health` (liveness) and `/ready` (readiness) for orchestrators.
pub struct AdminService {
    readiness: Readiness,
    instance_id: String,
}

impl AdminService {
    pub fn new(readiness: Readiness, instance_id: impl Into<String>) -> Self {
        Self {
            readiness,
            instance_id: instance_id.into(),
        }
    }

    fn respond(&self, path: &str) -> Response<ResponseBody> {
        match path {
            "/health" => make_response(StatusCode::OK, "ok\n"),
            "/ready" if self.readiness.is_ready() => {
                make_response(StatusCode::OK, format!("ok {}\n", self.instance_id))
            }
            "/ready" => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
            _ => make_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl Service<Request<Incoming>> for AdminService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = self.respond(req.uri().path());
        Box::pin(async move { Ok(res) })
    }
}

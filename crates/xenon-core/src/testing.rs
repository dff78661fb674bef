//! In-process transport for tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use crate::api::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::models::UserProfile;

pub(crate) const BASE_URL: &str = "http://xenon.test/api";

type Handler = Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

struct Route {
    method: Method,
    path: String,
    delay: Duration,
    handler: Handler,
}

/// Routes by method and path. Later routes shadow earlier ones; unrouted
/// requests get a 404.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn route<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.route_delayed(method, path, Duration::ZERO, handler);
    }

    pub(crate) fn route_delayed<F>(&self, method: Method, path: &str, delay: Duration, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.route_result(method, path, delay, move |req| Ok(handler(req)));
    }

    pub(crate) fn route_result<F>(&self, method: Method, path: &str, delay: Duration, handler: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        self.routes.lock().unwrap().push(Route {
            method,
            path: path.to_string(),
            delay,
            handler: Arc::new(handler),
        });
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .cloned()
            .collect()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let matched = {
            let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            routes
                .iter()
                .rev()
                .find(|r| r.method == request.method && r.path == request.url.path())
                .map(|r| (r.delay, Arc::clone(&r.handler)))
        };

        match matched {
            Some((delay, handler)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                handler(&request)
            }
            None => Ok(HttpResponse::new(StatusCode::NOT_FOUND, "")),
        }
    }
}

pub(crate) fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse::new(
        StatusCode::from_u16(status).unwrap(),
        body.to_string(),
    )
}

pub(crate) fn sample_user_json() -> serde_json::Value {
    serde_json::json!({
        "id": "u1",
        "nombreCompleto": "Ana Torres",
        "nombreUsuario": "ana",
        "email": "ana@xenon.test",
        "nivel": "gerente",
        "imagen": null,
        "permisosPorSucursal": [
            {
                "sucursalId": "monterrey",
                "menus": {
                    "panel": ["view"],
                    "auditoria": ["view", "edit"]
                }
            },
            {
                "sucursalId": "tamaulipas",
                "menus": { "panel": ["view"] }
            }
        ]
    })
}

pub(crate) fn sample_user() -> UserProfile {
    serde_json::from_value(sample_user_json()).unwrap()
}

/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use g3_geoip_dataset::DatasetManager;
use g3_geoip_dataset::update::http_date;

use crate::config::ServerConfig;

mod lang;
mod record;
use record::ResponseRecord;

const X_DATABASE_DATE: HeaderName = HeaderName::from_static("x-database-date");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_JAVASCRIPT: &str = "application/javascript";
const CONTENT_TYPE_CSV: &str = "text/csv";

const TRY_AGAIN_LATER: &str = "Try again later.";
const NOT_FOUND: &str = "404 page not found\n";

#[derive(Default, Deserialize)]
struct JsonParams {
    callback: Option<String>,
}

enum OutputFormat {
    Json { callback: Option<String> },
    Csv,
}

#[derive(Clone)]
struct FrontendState {
    manager: Arc<DatasetManager>,
    use_x_forwarded_for: bool,
    access_log: Option<slog::Logger>,
}

/// Routes of the lookup service, access lines go to `access_log` if set.
pub fn build_router(
    manager: Arc<DatasetManager>,
    config: &ServerConfig,
    access_log: Option<slog::Logger>,
) -> Router {
    let state = FrontendState {
        manager,
        use_x_forwarded_for: config.use_x_forwarded_for,
        access_log,
    };
    let router = Router::new()
        .route("/json/", get(json_client))
        .route("/json/:host", get(json_host))
        .route("/csv/", get(csv_client))
        .route("/csv/:host", get(csv_host))
        .with_state(state);
    with_timeouts(router, config)
}

/// Requests still reading their body after the read timeout, or without a
/// response after the write timeout, get `408 Request Timeout`.
fn with_timeouts(router: Router, config: &ServerConfig) -> Router {
    router
        .layer(TimeoutLayer::new(config.write_timeout))
        .layer(RequestBodyTimeoutLayer::new(config.read_timeout))
}

async fn json_client(
    State(state): State<FrontendState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<JsonParams>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let format = OutputFormat::Json {
        callback: params.callback,
    };
    state.serve("", peer.map(|c| c.0), &uri, &headers, format).await
}

async fn json_host(
    State(state): State<FrontendState>,
    Path(host): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<JsonParams>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let format = OutputFormat::Json {
        callback: params.callback,
    };
    state
        .serve(&host, peer.map(|c| c.0), &uri, &headers, format)
        .await
}

async fn csv_client(
    State(state): State<FrontendState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state
        .serve("", peer.map(|c| c.0), &uri, &headers, OutputFormat::Csv)
        .await
}

async fn csv_host(
    State(state): State<FrontendState>,
    Path(host): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state
        .serve(&host, peer.map(|c| c.0), &uri, &headers, OutputFormat::Csv)
        .await
}

impl FrontendState {
    async fn serve(
        &self,
        host: &str,
        peer: Option<SocketAddr>,
        uri: &Uri,
        headers: &HeaderMap,
        format: OutputFormat,
    ) -> Response {
        let rsp = match self.query(host, peer, headers).await {
            Ok((record, date)) => {
                let mut rsp = write_record(&record, format);
                if let Some(date) = date
                    && let Ok(v) = HeaderValue::from_str(&http_date(date))
                {
                    rsp.headers_mut().insert(X_DATABASE_DATE, v);
                }
                rsp
            }
            Err(rsp) => rsp,
        };

        if let Some(logger) = &self.access_log {
            let peer = peer
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string());
            slog::info!(logger, "GET {} {}", uri, rsp.status().as_u16(); "peer" => peer);
        }
        rsp
    }

    async fn query(
        &self,
        host: &str,
        peer: Option<SocketAddr>,
        headers: &HeaderMap,
    ) -> Result<(ResponseRecord, Option<DateTime<Utc>>), Response> {
        let host = host.trim_start_matches('/');
        let ip = if host.is_empty() {
            self.client_ip(peer, headers)
        } else {
            resolve_host(host).await
        };
        let Some(ip) = ip else {
            return Err((StatusCode::NOT_FOUND, NOT_FOUND).into_response());
        };

        let record = match self.manager.resolve(ip) {
            Ok(Some(r)) => {
                let accept = headers
                    .get(ACCEPT_LANGUAGE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let lang = lang::negotiate(accept, &r.country);
                ResponseRecord::new(ip, &r, &lang)
            }
            Ok(None) => ResponseRecord::empty(ip),
            Err(e) => {
                debug!("lookup of {ip} failed: {e}");
                return Err((StatusCode::SERVICE_UNAVAILABLE, TRY_AGAIN_LATER).into_response());
            }
        };
        Ok((record, self.manager.last_updated()))
    }

    fn client_ip(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> Option<IpAddr> {
        if self.use_x_forwarded_for
            && let Some(v) = headers.get(X_FORWARDED_FOR)
            && let Ok(s) = v.to_str()
            && let Some(first) = s.split(',').next()
            && let Ok(ip) = IpAddr::from_str(first.trim())
        {
            return Some(ip);
        }
        peer.map(|a| a.ip())
    }
}

async fn resolve_host(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = IpAddr::from_str(host) {
        return Some(ip);
    }
    let addrs: Vec<IpAddr> = match tokio::net::lookup_host((host, 0)).await {
        Ok(iter) => iter.map(|a| a.ip()).collect(),
        Err(e) => {
            debug!("failed to resolve {host}: {e}");
            return None;
        }
    };
    if addrs.is_empty() {
        None
    } else {
        Some(addrs[fastrand::usize(..addrs.len())])
    }
}

fn write_record(record: &ResponseRecord, format: OutputFormat) -> Response {
    let (content_type, body) = match format {
        OutputFormat::Json { callback } => {
            let json = match serde_json::to_string(record) {
                Ok(s) => s,
                Err(e) => {
                    return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
                }
            };
            match callback.filter(|cb| !cb.is_empty()) {
                Some(cb) => (CONTENT_TYPE_JAVASCRIPT, format!("{cb}({json});").into_bytes()),
                None => (CONTENT_TYPE_JSON, format!("{json}\n").into_bytes()),
            }
        }
        OutputFormat::Csv => match record.to_csv() {
            Ok(line) => (CONTENT_TYPE_CSV, line),
            Err(e) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        },
    };
    ([(CONTENT_TYPE, content_type)], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use std::sync::Mutex;
    use std::time::Duration;

    use axum::body::{Body, Bytes, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use g3_geoip_dataset::{DatasetConfig, DatasetSource};

    async fn open_manager() -> Arc<DatasetManager> {
        let path = PathBuf::from(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../lib/g3-geoip-dataset/testdata/city.csv"
        ));
        let mut config = DatasetConfig::new(DatasetSource::Local(path));
        config.set_watch(false);
        Arc::new(DatasetManager::open(config).await.unwrap())
    }

    fn router(manager: Arc<DatasetManager>, use_x_forwarded_for: bool) -> Router {
        let config = ServerConfig {
            use_x_forwarded_for,
            silent: true,
            ..Default::default()
        };
        build_router(manager, &config, None)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let rsp = app.oneshot(req).await.unwrap();
        let status = rsp.status();
        let headers = rsp.headers().clone();
        let body = to_bytes(rsp.into_body(), 64 * 1024).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn json_lookup() {
        let manager = open_manager().await;
        let (status, headers, body) = send(router(manager, false), request("/json/200.1.2.3")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], CONTENT_TYPE_JSON);
        assert!(headers[X_DATABASE_DATE].to_str().unwrap().ends_with(" GMT"));

        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["ip"], "200.1.2.3");
        assert_eq!(v["country_code"], "VE");
        assert_eq!(v["country_name"], "Venezuela");
        assert_eq!(v["region_name"], "Distrito Capital");
        assert_eq!(v["city"], "Caracas");
        assert_eq!(v["zip_code"], "1010");
        assert_eq!(v["time_zone"], "America/Caracas");
        assert_eq!(v["continent"], "South America");
    }

    #[tokio::test]
    async fn jsonp() {
        let manager = open_manager().await;
        let (status, headers, body) =
            send(router(manager, false), request("/json/8.8.8.8?callback=cb")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], CONTENT_TYPE_JAVASCRIPT);
        assert!(body.starts_with("cb({"));
        assert!(body.ends_with("});"));
        assert!(body.contains("\"city\":\"Mountain View\""));
        assert!(body.contains("\"metro_code\":807"));
    }

    #[tokio::test]
    async fn csv_lookup() {
        let manager = open_manager().await;
        let (status, headers, body) = send(router(manager, false), request("/csv/200.1.2.3")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], CONTENT_TYPE_CSV);
        assert!(body.starts_with("200.1.2.3,VE,Venezuela,A,Distrito Capital,Caracas,1010,"));
        assert!(body.ends_with("\r\n"));
        assert_eq!(body.split(',').count(), 11);
    }

    #[tokio::test]
    async fn not_found_has_only_ip() {
        let manager = open_manager().await;
        let (status, _, body) = send(router(manager, false), request("/json/192.0.2.1")).await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["ip"], "192.0.2.1");
        assert_eq!(v["country_code"], "");
        assert_eq!(v["city"], "");
        assert_eq!(v["latitude"], 0.0);
    }

    #[tokio::test]
    async fn client_address() {
        let manager = open_manager().await;

        let mut req = request("/json/");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([8, 8, 8, 8], 40000))));
        let (status, _, body) = send(router(manager.clone(), false), req).await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["ip"], "8.8.8.8");

        let mut req = Request::builder()
            .uri("/json/")
            .header(X_FORWARDED_FOR, "200.1.2.3, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([8, 8, 8, 8], 40000))));
        let (_, _, body) = send(router(manager.clone(), true), req).await;
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["city"], "Caracas");

        // no peer address and nothing forwarded
        let (status, _, _) = send(router(manager, true), request("/csv/")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    struct CollectDrain(Arc<Mutex<Vec<String>>>);

    impl slog::Drain for CollectDrain {
        type Ok = ();
        type Err = slog::Never;

        fn log(&self, record: &slog::Record, _: &slog::OwnedKVList) -> Result<(), slog::Never> {
            self.0.lock().unwrap().push(record.msg().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn access_log_has_request_uri() {
        let manager = open_manager().await;
        let lines = Arc::new(Mutex::new(Vec::new()));
        let logger = slog::Logger::root(CollectDrain(lines.clone()), slog::o!());
        let app = build_router(manager, &ServerConfig::default(), Some(logger));

        let mut req = request("/csv/");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([8, 8, 8, 8], 40000))));
        send(app.clone(), req).await;
        send(app.clone(), request("/json/200.1.2.3?callback=cb")).await;
        send(app, request("/json/")).await;

        let lines = lines.lock().unwrap();
        assert_eq!(
            *lines,
            [
                "GET /csv/ 200",
                "GET /json/200.1.2.3?callback=cb 200",
                "GET /json/ 404",
            ]
        );
    }

    #[tokio::test]
    async fn write_timeout() {
        let config = ServerConfig {
            write_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done"
            }),
        );
        let (status, _, _) = send(with_timeouts(slow, &config), request("/slow")).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn read_timeout() {
        let config = ServerConfig {
            read_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let echo = Router::new().route("/echo", axum::routing::post(|body: Bytes| async move { body }));
        let stalled = futures_util::stream::pending::<Result<Bytes, std::io::Error>>();
        let req = Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from_stream(stalled))
            .unwrap();
        let rsp = tokio::time::timeout(
            Duration::from_secs(5),
            with_timeouts(echo, &config).oneshot(req),
        )
        .await
        .expect("request body read not timed out")
        .unwrap();
        assert!(rsp.status().is_client_error());
    }

    #[tokio::test]
    async fn unavailable_after_close() {
        let manager = open_manager().await;
        manager.close().await;
        let (status, headers, body) = send(router(manager, false), request("/json/200.1.2.3")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, TRY_AGAIN_LATER);
        assert!(headers.get(X_DATABASE_DATE).is_none());
    }
}

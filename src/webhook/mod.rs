// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Admission webhook server.
//!
//! Serves `POST /mutate-pod` for the pod mutation hook and `GET /healthz`.
//! Speaks TLS when a certificate and key are configured, plain HTTP otherwise.

pub mod pods;

use crate::config::{Config, TlsFiles};
use crate::error::{RegcredError, Result};
use crate::events::EventPublisher;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use kube::Client;
use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub const MUTATE_POD_PATH: &str = "/mutate-pod";
pub const HEALTHZ_PATH: &str = "/healthz";

/// Shared state handed to every admission request
pub struct WebhookState {
    pub client: Client,
    pub config: Config,
    pub events: Arc<dyn EventPublisher>,
}

/// Accept connections until SIGINT or SIGTERM
pub async fn serve(state: Arc<WebhookState>) -> anyhow::Result<()> {
    let acceptor = state
        .config
        .webhook_tls
        .as_ref()
        .map(tls_acceptor)
        .transpose()?;

    let addr = state.config.webhook_bind_address;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, tls = acceptor.is_some(), "Admission webhook listening");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => {
                info!("Admission webhook shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };
        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Admission webhook accept error");
                continue;
            }
        };

        let state = state.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| route(state.clone(), req));

            let served = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls) => {
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(tls), service)
                            .await
                    }
                    Err(e) => {
                        warn!(%peer_addr, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => {
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                }
            };

            if let Err(e) = served {
                debug!(%peer_addr, error = %e, "Admission webhook connection ended with error");
            }
        });
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn route<B>(
    state: Arc<WebhookState>,
    req: Request<B>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, HEALTHZ_PATH) => respond(StatusCode::OK, "text/plain", Bytes::from_static(b"ok")),
        (&Method::POST, MUTATE_POD_PATH) => mutate_pod(&state, req).await,
        _ => respond(
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"not found"),
        ),
    };
    Ok(response)
}

async fn mutate_pod<B>(state: &WebhookState, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            warn!(error = %e, "Malformed admission review");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let reviewed = pods::mutate(state, review).await;
    match serde_json::to_vec(&reviewed) {
        Ok(json) => respond(StatusCode::OK, "application/json", Bytes::from(json)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn error_response(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    respond(status, "application/json", Bytes::from(body))
}

fn respond(status: StatusCode, content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    if let Ok(value) = http::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(http::header::CONTENT_TYPE, value);
    }
    response
}

/// Build a TLS acceptor from a PEM certificate chain and private key
pub fn tls_acceptor(files: &TlsFiles) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&files.cert)?))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(RegcredError::TlsError(format!(
            "no certificate found in {}",
            files.cert.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(&files.key)?))?
        .ok_or_else(|| {
            RegcredError::TlsError(format!("no private key found in {}", files.key.display()))
        })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RegcredError::TlsError(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

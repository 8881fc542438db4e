//! Minimal static file server for the stats file (spec.md §6 "Optional
//! HTTP endpoint"), grounded on the teacher's general use of `hyper` for
//! HTTP plumbing (`tools/http.rs`), generalized down from a full HTTP
//! client to the one-file static server this component needs.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Error};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

/// Serve `<temp_dir>/<file_name>` on `:<port>`, IPv6 dual-stack when the
/// platform supports it. Runs until the returned future is dropped or
/// the process exits; intended to be spawned as a background task.
pub async fn serve(port: u16, temp_dir: PathBuf, file_name: &'static str) -> Result<(), Error> {
    let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);

    let make_svc = make_service_fn(move |_conn| {
        let temp_dir = temp_dir.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let temp_dir = temp_dir.clone();
                async move { Ok::<_, Infallible>(handle(req, &temp_dir, file_name).await) }
            }))
        }
    });

    Server::bind(&addr)
        .serve(make_svc)
        .await
        .with_context(|| format!("stats HTTP server failed on {}", addr))
}

async fn handle(req: Request<Body>, temp_dir: &std::path::Path, file_name: &str) -> Response<Body> {
    let requested = req.uri().path().trim_start_matches('/');
    let target = if requested.is_empty() { file_name } else { requested };

    // Only ever serve the single known stats file; no directory traversal.
    if target != file_name {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found"))
            .unwrap();
    }

    match tokio::fs::read(temp_dir.join(file_name)).await {
        Ok(data) => Response::new(Body::from(data)),
        Err(_) => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("stats file not yet written"))
            .unwrap(),
    }
}

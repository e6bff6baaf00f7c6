// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the ingest daemon.
//!
//! Two endpoints: `POST /submit` for appliance submissions and
//! `GET /healthz` for load-balancer probes. Everything in a submission body
//! is handed to the aggregator as-is; the only transport-level concerns
//! here are decoding, size limiting and country attribution.

use std::{convert::Infallible, sync::Arc};

use serde_json::{json, Value};
use tracing::{debug, warn};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use sondage::Aggregator;

/// Submissions are small appliance self-descriptions; anything bigger than
/// this is noise or abuse.
const MAX_SUBMISSION_BYTES: u64 = 1024 * 1024;

/// The complete route tree. Callers attach [`handle_rejection`] with
/// `.recover(..)` so transport-level failures come back as JSON.
pub(crate) fn routes(
    aggregator: Arc<Aggregator>,
    country_header: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    submit(aggregator, country_header).or(health())
}

fn submit(
    aggregator: Arc<Aggregator>,
    country_header: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("submit")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_SUBMISSION_BYTES))
        .and(warp::body::json())
        .and(country(country_header))
        .and(with_aggregator(aggregator))
        .and_then(handle_submit)
}

fn health() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("healthz")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&json!({"status": "ok"})))
}

/// Extracts the country code attributed by the edge proxy, or `""`.
fn country(header: String) -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::header::headers_cloned().map(move |headers: warp::http::HeaderMap| {
        headers
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string()
    })
}

fn with_aggregator(
    aggregator: Arc<Aggregator>,
) -> impl Filter<Extract = (Arc<Aggregator>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&aggregator))
}

async fn handle_submit(
    event: Value,
    country: String,
    aggregator: Arc<Aggregator>,
) -> Result<impl Reply, Infallible> {
    match aggregator.submit(&event, &country) {
        Ok(receipt) => {
            let status = if receipt.merged_any() { "ok" } else { "duplicate" };
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({"status": status})),
                StatusCode::OK,
            ))
        }
        Err(err) => {
            debug!(error = %err, "rejecting submission");
            Ok(warp::reply::with_status(
                warp::reply::json(&json!({"status": "rejected", "reason": err.to_string()})),
                StatusCode::BAD_REQUEST,
            ))
        }
    }
}

pub(crate) async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, reason) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(decode) = err.find::<warp::filters::body::BodyDeserializeError>() {
        debug!(error = %decode, "dropping undecodable submission");
        (StatusCode::BAD_REQUEST, decode.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "submission too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        warn!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({"status": "error", "reason": reason})),
        status,
    ))
}

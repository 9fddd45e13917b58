//! HTTP endpoint, bridged to the control loop over the web mailbox.
//!
//! The axum router runs inside a single-threaded tokio runtime on its own
//! thread; every request is forwarded as a `WebRequest` and answered from
//! the loop between ticks. Dashboard rendering is out of scope; `/` serves
//! a placeholder pointing at `/data`.

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::extract::{Form, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use charger_core::TunableUpdate;
use charger_core::runner::WebRequest;
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Deserialize;
use tracing::{error, info};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Web-side bound on temporary load-off requests, in seconds.
const WEB_TOGGLE_MAX_SECONDS: i64 = 300;

#[derive(Clone)]
struct WebState {
    tx: Sender<WebRequest>,
}

/// Spawn the endpoint thread. Returns immediately; serving errors are
/// logged, not fatal to the control loop.
pub fn spawn(bind: SocketAddr, tx: Sender<WebRequest>) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name(String::from("charger-web")).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(error = %e, "web runtime build failed");
                return;
            }
        };
        if let Err(e) = runtime.block_on(serve(bind, tx)) {
            error!(error = %e, "web endpoint stopped");
        }
    })
}

async fn serve(bind: SocketAddr, tx: Sender<WebRequest>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/", get(index))
        .route("/data", get(data))
        .route("/update", post(update))
        .route("/toggle-load", post(toggle_load))
        .with_state(WebState { tx });
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "web endpoint listening");
    axum::serve(listener, app).await
}

/// Await a loop reply without blocking the async worker.
async fn recv_reply<T: Send + 'static>(rx: Receiver<T>) -> Option<T> {
    tokio::task::spawn_blocking(move || rx.recv_timeout(REPLY_TIMEOUT).ok())
        .await
        .ok()
        .flatten()
}

async fn index() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html><html><head><title>Charge Controller</title></head>\
         <body><h1>Charge Controller</h1>\
         <p>State: <a href=\"/data\">/data</a> (JSON)</p></body></html>",
    )
}

async fn data(State(state): State<WebState>) -> Response {
    let (reply_tx, reply_rx) = bounded(1);
    if state.tx.send(WebRequest::Data { reply: reply_tx }).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match recv_reply(reply_rx).await {
        Some(json) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        None => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateForm {
    #[serde(rename = "batteryCapacity")]
    battery_capacity: f32,
    #[serde(rename = "thresholdPercentage")]
    threshold_percentage: f32,
    #[serde(rename = "maxAllowedCurrent")]
    max_allowed_current: f32,
    #[serde(rename = "bulkVoltage")]
    bulk_voltage: f32,
    #[serde(rename = "absorptionVoltage")]
    absorption_voltage: f32,
    #[serde(rename = "floatVoltage")]
    float_voltage: f32,
    #[serde(rename = "isLithium")]
    is_lithium: String,
    #[serde(rename = "powerSource", default)]
    power_source: Option<String>,
    #[serde(rename = "fuenteDC_Amps", default)]
    fuente_dc_amps: Option<f32>,
}

async fn update(State(state): State<WebState>, Form(form): Form<UpdateForm>) -> Response {
    let update = TunableUpdate {
        battery_capacity_ah: form.battery_capacity,
        threshold_percentage: form.threshold_percentage,
        max_allowed_current_ma: form.max_allowed_current,
        bulk_voltage: form.bulk_voltage,
        absorption_voltage: form.absorption_voltage,
        float_voltage: form.float_voltage,
        is_lithium: form.is_lithium == "true",
        use_dc_source: form.power_source.as_deref() == Some("true"),
        dc_source_amps: form.fuente_dc_amps.unwrap_or(0.0),
    };
    let (reply_tx, reply_rx) = bounded(1);
    if state
        .tx
        .send(WebRequest::Update { update, reply: reply_tx })
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match recv_reply(reply_rx).await {
        Some(Ok(())) => Redirect::to("/").into_response(),
        Some(Err(reason)) => (StatusCode::BAD_REQUEST, reason).into_response(),
        None => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ToggleForm {
    seconds: i64,
}

async fn toggle_load(State(state): State<WebState>, Form(form): Form<ToggleForm>) -> Response {
    if !(1..=WEB_TOGGLE_MAX_SECONDS).contains(&form.seconds) {
        return (
            StatusCode::BAD_REQUEST,
            format!("seconds must be in [1, {WEB_TOGGLE_MAX_SECONDS}]"),
        )
            .into_response();
    }
    let (reply_tx, reply_rx) = bounded(1);
    if state
        .tx
        .send(WebRequest::ToggleLoad {
            seconds: form.seconds as u64,
            reply: reply_tx,
        })
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match recv_reply(reply_rx).await {
        Some(Ok(_seconds)) => Redirect::to("/").into_response(),
        Some(Err(reason)) => (StatusCode::BAD_REQUEST, reason).into_response(),
        None => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

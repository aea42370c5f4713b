//! Minimal HTTP status surface: the pending login QR code and the event log.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{extract::State, response::Html, routing::get, Router};
use qrcode::{render::svg, QrCode};
use tokio_util::sync::CancellationToken;

use relay_core::{logging::LogBuffer, status::SessionStatus};

const NO_QR_CODE: &str = "<h1>No QR Code available yet. Please wait...</h1>";

#[derive(Clone)]
pub struct StatusState {
    pub status: Arc<SessionStatus>,
    pub log: Arc<LogBuffer>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/qrcode", get(qrcode_page))
        .route("/logs", get(logs_page))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: StatusState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "status server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("status server stopped");
    Ok(())
}

async fn qrcode_page(State(state): State<StatusState>) -> Html<String> {
    let Some(code) = state.status.scan_code() else {
        return Html(NO_QR_CODE.to_string());
    };
    match render_svg(&code) {
        Ok(svg) => Html(format!("<h1>Relay QR Code:</h1>{svg}")),
        Err(e) => {
            tracing::warn!(error = %e, "could not render scan code");
            Html(NO_QR_CODE.to_string())
        }
    }
}

async fn logs_page(State(state): State<StatusState>) -> Html<String> {
    Html(format!(
        "<h1>Relay Logs:</h1><pre>{}</pre>",
        escape_html(&state.log.render_text())
    ))
}

fn render_svg(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes())?;
    Ok(qr
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .build())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

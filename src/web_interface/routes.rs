use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{status_code_for, ActionResponse, ApiError, MessageResponse, StartBody};
use crate::error_handling::types::ControllerError;
use crate::launcher::{Launcher, LauncherReport};

fn error_reply(err: &ControllerError) -> reply::Response {
    reply::with_status(reply::json(&ApiError::from(err)), status_code_for(err)).into_response()
}

/// Headers of a state-changing request, checked before anything runs.
///
/// Browsers attach `Origin` to cross-site requests and may send "simple"
/// form or `text/plain` POSTs without a preflight, so those are refused.
#[derive(Debug, Clone)]
pub struct Caller {
    origin: Option<String>,
    content_type: Option<String>,
}

impl Caller {
    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
            .unwrap_or(false)
    }

    /// `None` when the request may proceed. A body requires a JSON content type.
    pub fn refusal(&self, has_body: bool) -> Option<reply::Response> {
        if let Some(origin) = &self.origin {
            if !is_loopback_origin(origin) {
                warn!("Refused request from origin {}", origin);
                return Some(refuse(StatusCode::FORBIDDEN, "Cross-origin requests are not allowed"));
            }
        }
        if (has_body || self.content_type.is_some()) && !self.is_json() {
            return Some(refuse(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Request body must be application/json",
            ));
        }
        None
    }
}

fn refuse(status: StatusCode, message: &str) -> reply::Response {
    reply::with_status(reply::json(&ApiError::new(message)), status).into_response()
}

pub fn is_loopback_origin(origin: &str) -> bool {
    let Some((_, rest)) = origin.split_once("://") else {
        return false;
    };
    let host = match rest.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or_default(),
        None => rest.split([':', '/']).next().unwrap_or_default(),
    };
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

fn caller() -> impl Filter<Extract = (Caller,), Error = Rejection> + Clone {
    warp::header::optional::<String>("origin")
        .and(warp::header::optional::<String>("content-type"))
        .map(|origin: Option<String>, content_type: Option<String>| Caller {
            origin,
            content_type,
        })
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_dashboard(report: &LauncherReport) -> String {
    let address = match &report.address {
        Some(addr) => format!("<a href=\"{0}\">{0}</a>", escape(addr)),
        None => "unavailable".to_string(),
    };
    let failure = match &report.last_failure {
        Some(f) => format!(
            "<p><b>Last start failed ({}):</b> {}</p>",
            f.kind,
            escape(&f.detail)
        ),
        None => String::new(),
    };
    let progress = match (&report.progress, report.update_running) {
        (Some(p), _) => match p.fraction {
            Some(fraction) => format!("<p>Downloading: {:.0}%</p>", fraction * 100.0),
            None => format!("<p>Downloading: {} bytes</p>", p.current),
        },
        (None, true) => "<p>Downloading...</p>".to_string(),
        (None, false) => String::new(),
    };
    format!(
        r#"<html><head><title>Labs Launcher</title><meta http-equiv="refresh" content="5"></head>
<body><h1>Labs Launcher</h1>
<p>Docker: {}</p>
<p>Server: {}</p>
<p>Image tag: {}{}</p>
<p>Address: {}</p>
{}{}<p>See /status for JSON.</p></body></html>"#,
        if report.available { "available" } else { "not available" },
        report.status,
        escape(report.tag.as_deref().unwrap_or("none")),
        if report.update_available { " (update available)" } else { "" },
        address,
        failure,
        progress,
    )
}

/// GET /
pub fn dashboard_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end().and(warp::get()).and_then(move || {
        let launcher = launcher.clone();
        async move {
            let report = launcher.report().await;
            Ok::<_, Rejection>(reply::html(render_dashboard(&report)))
        }
    })
}

/// GET /status
pub fn status_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let launcher = launcher.clone();
            async move { Ok::<_, Rejection>(reply::json(&launcher.report().await)) }
        })
}

/// GET /tags
pub fn tags_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("tags")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let launcher = launcher.clone();
            async move { Ok::<_, Rejection>(reply::json(&launcher.tags().registry)) }
        })
}

/// POST /start
pub fn start_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("start")
        .and(warp::path::end())
        .and(warp::post())
        .and(caller())
        .and(warp::body::bytes())
        .and_then(move |caller: Caller, body: bytes::Bytes| {
            let launcher = launcher.clone();
            async move {
                if let Some(refused) = caller.refusal(!body.is_empty()) {
                    return Ok::<_, Rejection>(refused);
                }
                let body = if body.is_empty() {
                    StartBody::default()
                } else {
                    match serde_json::from_slice::<StartBody>(&body) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            return Ok::<_, Rejection>(
                                reply::with_status(
                                    reply::json(&ApiError::new(format!("Malformed body: {}", e))),
                                    StatusCode::BAD_REQUEST,
                                )
                                .into_response(),
                            )
                        }
                    }
                };
                let request = body.into_request(launcher.default_request());

                match launcher.start(&request).await {
                    Ok(status) => {
                        let address = launcher.controller().server_address().await;
                        Ok::<_, Rejection>(
                            reply::json(&ActionResponse { status, address }).into_response(),
                        )
                    }
                    Err(e) => {
                        error!("Start request failed: {}", e);
                        Ok::<_, Rejection>(error_reply(&e))
                    }
                }
            }
        })
}

/// POST /stop
pub fn stop_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("stop")
        .and(warp::path::end())
        .and(warp::post())
        .and(caller())
        .and_then(move |caller: Caller| {
            let launcher = launcher.clone();
            async move {
                if let Some(refused) = caller.refusal(false) {
                    return Ok::<_, Rejection>(refused);
                }
                match launcher.stop().await {
                    Ok(status) => Ok::<_, Rejection>(
                        reply::json(&ActionResponse {
                            status,
                            address: None,
                        })
                        .into_response(),
                    ),
                    Err(e) => Ok::<_, Rejection>(error_reply(&e)),
                }
            }
        })
}

/// POST /update
pub fn update_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("update")
        .and(warp::path::end())
        .and(warp::post())
        .and(caller())
        .and_then(move |caller: Caller| {
            let launcher = launcher.clone();
            async move {
                if let Some(refused) = caller.refusal(false) {
                    return Ok::<_, Rejection>(refused);
                }
                let guard = match launcher.begin_update() {
                    Ok(guard) => guard,
                    Err(e) => return Ok::<_, Rejection>(error_reply(&e)),
                };
                let background = launcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = background.run_update(guard).await {
                        error!("Background update failed: {}", e);
                    }
                });
                info!("Update started from control interface");
                Ok::<_, Rejection>(
                    reply::with_status(
                        reply::json(&MessageResponse {
                            message: "Update started".to_string(),
                        }),
                        StatusCode::ACCEPTED,
                    )
                    .into_response(),
                )
            }
        })
}

/// POST /update/cancel
pub fn cancel_update_route(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("update" / "cancel")
        .and(warp::post())
        .and(caller())
        .and_then(move |caller: Caller| {
            let launcher = launcher.clone();
            async move {
                if let Some(refused) = caller.refusal(false) {
                    return Ok::<_, Rejection>(refused);
                }
                let message = if launcher.cancel_update() {
                    "Update cancelled"
                } else {
                    "No update running"
                };
                Ok::<_, Rejection>(
                    reply::json(&MessageResponse {
                        message: message.to_string(),
                    })
                    .into_response(),
                )
            }
        })
}

/// Every route of the control interface.
pub fn routes(
    launcher: Arc<Launcher>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    dashboard_route(launcher.clone())
        .or(status_route(launcher.clone()))
        .or(tags_route(launcher.clone()))
        .or(start_route(launcher.clone()))
        .or(stop_route(launcher.clone()))
        .or(cancel_update_route(launcher.clone()))
        .or(update_route(launcher))
}

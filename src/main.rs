mod app_state;

use crate::app_state::AppState;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use chapter_grabber::batch::{BatchError, ChapterQueue};
use chapter_grabber::config::Config;
use chapter_grabber::error::{EngineError, SessionError};
use chapter_grabber::persistence::read_tree;
use log::{error, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Deserialize)]
struct CaptureRequest {
    url: String,
    /// Answer with the finished report instead of returning at once
    #[serde(default)]
    wait: bool,
}

#[derive(Debug, Deserialize)]
struct DiscoverRequest {
    url: String,
    max_chapters: Option<usize>,
    /// Replace the batch queue with the discovered chapters
    #[serde(default)]
    queue: bool,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    index: usize,
    selected: bool,
}

fn engine_error_response(url: &str, e: EngineError) -> HttpResponse {
    match e {
        EngineError::Session(SessionError::AlreadyActive(_)) => HttpResponse::Conflict()
            .json(serde_json::json!({"error": format!("A capture is already running for {}", url)})),
        other => HttpResponse::UnprocessableEntity()
            .json(serde_json::json!({"error": other.to_string(), "url": url})),
    }
}

fn batch_error_response(e: BatchError) -> HttpResponse {
    match e {
        BatchError::AlreadyRunning => {
            HttpResponse::Conflict().json(serde_json::json!({"error": e.to_string()}))
        }
        BatchError::UnknownIndex(_) => {
            HttpResponse::BadRequest().json(serde_json::json!({"error": e.to_string()}))
        }
    }
}

#[post("/capture")]
async fn capture(data: web::Data<AppState>, body: web::Json<CaptureRequest>) -> impl Responder {
    let CaptureRequest { url, wait } = body.into_inner();
    if url.trim().is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({"error": "url is required"}));
    }
    // Claimed before the page opens so a concurrent request sees the 409
    let guard = match data.engine.registry().begin(&url) {
        Ok(guard) => guard,
        Err(e) => return engine_error_response(&url, e.into()),
    };

    let target = match data.targets.open().await {
        Ok(t) => t,
        Err(e) => {
            error!("Could not open a page for {}: {}", url, e);
            return HttpResponse::ServiceUnavailable()
                .json(serde_json::json!({"error": e.to_string()}));
        }
    };

    if wait {
        return match data.engine.capture_claimed(guard, target, &url, false).await {
            Ok(report) => HttpResponse::Ok().json(report),
            Err(e) => engine_error_response(&url, e),
        };
    }

    let engine = data.engine.clone();
    let task_url = url.clone();
    actix_web::rt::spawn(async move {
        match engine.capture_claimed(guard, target, &task_url, false).await {
            Ok(report) => info!(
                "Captured {}: {}/{} images",
                task_url, report.success_count, report.total
            ),
            Err(e) => warn!("Capture of {} ended early: {}", task_url, e),
        }
    });

    HttpResponse::Accepted().json(serde_json::json!({"status": "started", "url": url}))
}

#[post("/discover")]
async fn discover(data: web::Data<AppState>, body: web::Json<DiscoverRequest>) -> impl Responder {
    let request = body.into_inner();
    if request.queue && data.batch.is_running() {
        return batch_error_response(BatchError::AlreadyRunning);
    }

    let target = match data.targets.open().await {
        Ok(t) => t,
        Err(e) => {
            error!("Could not open a page for discovery: {}", e);
            return HttpResponse::ServiceUnavailable()
                .json(serde_json::json!({"error": e.to_string()}));
        }
    };

    let outcome = data
        .discoverer
        .discover(target.as_ref(), &request.url, request.max_chapters)
        .await;
    info!(
        "Discovered {} chapters from {} ({:?}, stopped: {:?})",
        outcome.urls.len(),
        request.url,
        outcome.method,
        outcome.stop
    );

    if request.queue {
        if let Err(e) = data.batch.load(ChapterQueue::from_urls(outcome.urls.clone())) {
            return batch_error_response(e);
        }
    }

    HttpResponse::Ok().json(outcome)
}

#[get("/batch")]
async fn get_batch(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.batch.snapshot())
}

#[post("/batch")]
async fn load_batch(data: web::Data<AppState>, body: web::Json<BatchRequest>) -> impl Responder {
    let queue = ChapterQueue::from_urls(body.into_inner().urls);
    match data.batch.load(queue) {
        Ok(()) => HttpResponse::Ok().json(data.batch.snapshot()),
        Err(e) => batch_error_response(e),
    }
}

#[post("/batch/select")]
async fn select_batch_item(
    data: web::Data<AppState>,
    body: web::Json<SelectRequest>,
) -> impl Responder {
    match data.batch.set_selected(body.index, body.selected) {
        Ok(()) => HttpResponse::Ok().json(data.batch.snapshot()),
        Err(e) => batch_error_response(e),
    }
}

#[post("/batch/start")]
async fn start_batch(data: web::Data<AppState>) -> impl Responder {
    if data.batch.snapshot().items.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({"error": "batch queue is empty"}));
    }
    if let Err(e) = data.batch.try_start() {
        return batch_error_response(e);
    }

    let batch = data.batch.clone();
    let engine = data.engine.clone();
    let targets = data.targets.clone();
    let settings = data.config.batch.clone();
    actix_web::rt::spawn(async move {
        let summary = batch.run(&engine, targets.as_ref(), &settings).await;
        info!(
            "Batch summary: {} completed, {} failed, {} skipped",
            summary.completed, summary.failed, summary.skipped
        );
    });

    HttpResponse::Accepted().json(serde_json::json!({"status": "started"}))
}

#[post("/batch/cancel")]
async fn cancel_batch(data: web::Data<AppState>) -> impl Responder {
    data.batch.cancel();
    HttpResponse::Ok().json(data.batch.snapshot())
}

#[get("/progress")]
async fn get_progress(
    data: web::Data<AppState>,
    query: web::Query<HashMap<String, String>>,
) -> impl Responder {
    let progress = data.engine.progress();
    match query.get("url") {
        Some(url) => match progress.latest(url) {
            Some(event) => HttpResponse::Ok().json(event),
            None => HttpResponse::NotFound()
                .json(serde_json::json!({"error": "No capture seen for this url"})),
        },
        None => HttpResponse::Ok().json(serde_json::json!({
            "active": data.engine.registry().active_count(),
            "sessions": progress.all_latest(),
        })),
    }
}

/// Server-sent events, one per progress snapshot
#[get("/progress/stream")]
async fn progress_stream(data: web::Data<AppState>) -> impl Responder {
    let rx = data.engine.progress().subscribe();
    let events = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    let chunk = web::Bytes::from(format!("data: {}\n\n", payload));
                    return Some((Ok::<_, std::convert::Infallible>(chunk), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Progress stream lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(events)
}

#[get("/library")]
async fn get_library(data: web::Data<AppState>) -> impl Responder {
    let root = data.engine.library().clone();
    match web::block(move || read_tree(&root)).await {
        Ok(Ok(series)) => HttpResponse::Ok().json(serde_json::json!({
            "library": data.engine.library(),
            "series": series,
        })),
        Ok(Err(e)) => {
            error!("Failed to read library: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({"error": e.to_string()}))
        }
        Err(e) => {
            error!("Library task failed: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let all_metrics = data.metrics.get_all_metrics();

    let metrics_json: Vec<serde_json::Value> = all_metrics
        .iter()
        .map(|m| {
            serde_json::json!({
                "strategy": m.strategy,
                "success_rate": format!("{:.2}%", m.success_rate()),
                "total_attempts": m.total_attempts,
                "successful": m.successful,
                "failed": m.failed,
                "average_capture_time_ms": format!("{:.2}", m.average_capture_time_ms),
                "retry_count": m.retry_count,
                "fallback_count": m.fallback_count,
                "rate_limit_hits": m.rate_limit_hits,
                "taint_count": m.taint_count,
                "timeout_count": m.timeout_count,
                "last_success": m.last_success,
                "last_failure": m.last_failure,
                "last_error": m.last_error,
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "metrics": metrics_json,
        "total_strategies_tracked": all_metrics.len()
    }))
}

#[get("/metrics/summary")]
async fn get_metrics_summary(data: web::Data<AppState>) -> impl Responder {
    use std::fmt::Write;

    let mut sorted_metrics = data.metrics.get_all_metrics();
    sorted_metrics.sort_by(|a, b| {
        b.success_rate()
            .partial_cmp(&a.success_rate())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut summary = String::new();
    let _ = writeln!(&mut summary, "\n=== Capture Strategy Summary ===\n");
    for m in sorted_metrics {
        let _ = writeln!(&mut summary, "Strategy: {}", m.strategy);
        let _ = writeln!(&mut summary, "  Success Rate: {:.2}%", m.success_rate());
        let _ = writeln!(&mut summary, "  Attempts: {}", m.total_attempts);
        let _ = writeln!(&mut summary, "  Successful: {}", m.successful);
        let _ = writeln!(&mut summary, "  Failed: {}", m.failed);
        let _ = writeln!(
            &mut summary,
            "  Avg Capture Time: {:.2}ms",
            m.average_capture_time_ms
        );
        let _ = writeln!(&mut summary, "  Retries: {}", m.retry_count);
        let _ = writeln!(&mut summary, "  Fallbacks: {}", m.fallback_count);
        let _ = writeln!(&mut summary, "  Rate Limit Hits: {}", m.rate_limit_hits);
        let _ = writeln!(&mut summary, "  Tainted Canvases: {}", m.taint_count);
        let _ = writeln!(&mut summary, "  Timeouts: {}", m.timeout_count);
        if let Some(ref last_error) = m.last_error {
            let _ = writeln!(&mut summary, "  Last Error: {}", last_error);
        }
        let _ = writeln!(&mut summary);
    }

    HttpResponse::Ok().content_type("text/plain").body(summary)
}

/// Console-only logging for when `log4rs.yml` is missing or broken
fn init_fallback_logging() {
    use log4rs::append::console::ConsoleAppender;
    use log4rs::config::{Appender, Config as LogConfig, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Logging unavailable: {}", e);
            }
        }
        Err(e) => eprintln!("Logging unavailable: {}", e),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        eprintln!("Could not load log4rs.yml ({}), logging to console", e);
        init_fallback_logging();
    }

    let cfg = Config::load();

    // Create enhanced HTTP client from configuration
    let http = match cfg.bot_detection.create_http_client() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let browser = if cfg.bot_detection.enable_browser {
        match cfg.bot_detection.create_browser_manager() {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!("Browser unavailable, falling back to static pages: {}", e);
                None
            }
        }
    } else {
        None
    };

    info!("Chapter grabber configured:");
    info!("  Library: {}", cfg.library_dir);
    info!("  Window size: {}", cfg.capture.window_size);
    info!("  Max attempts per image: {}", cfg.capture.max_retries);
    info!("  Browser: {}", if browser.is_some() { "chrome" } else { "disabled" });

    let host = cfg.server.host.clone();
    let ports = cfg.server.port_start..=cfg.server.port_end;
    let data = web::Data::new(AppState::build(cfg, http, browser));

    // Try to bind to an available port in the configured range
    let mut last_err: Option<std::io::Error> = None;
    for port in ports.clone() {
        let data_clone = data.clone();
        let addr = format!("{}:{}", host, port);
        match HttpServer::new(move || {
            App::new()
                .app_data(data_clone.clone())
                .service(capture)
                .service(discover)
                .service(get_batch)
                .service(load_batch)
                .service(select_batch_item)
                .service(start_batch)
                .service(cancel_batch)
                .service(get_progress)
                .service(progress_stream)
                .service(get_library)
                .service(get_metrics)
                .service(get_metrics_summary)
        })
        .bind(&addr)
        {
            Ok(server) => {
                info!("Listening on {}", addr);
                return server.run().await;
            }
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("No available ports {}-{}", ports.start(), ports.end()),
        )
    }))
}

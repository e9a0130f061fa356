use std::{
    convert::Infallible,
    time::{SystemTime, UNIX_EPOCH},
};

use actix_web::{get, http::header, post, web, HttpResponse};
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    configuration::HarvestSettings,
    domain::{
        csv_export::{export_file_name, leads_to_csv},
        lead::LeadRecord,
        search::{AggregationResult, ConcurrencyMode, ProgressEvent},
    },
    services::{Harvester, PipelineError, RunGate},
};

#[derive(Deserialize)]
pub struct HarvestQuery {
    query: String,
    #[serde(default = "default_mode")]
    mode: ConcurrencyMode,
}

fn default_mode() -> ConcurrencyMode {
    ConcurrencyMode::Parallel
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(error: &PipelineError) -> Self {
        ErrorBody {
            error: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// One line of the `/lead/stream` body.
#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Progress(ProgressEvent),
    Result(AggregationResult),
    Error(ErrorBody),
}

fn error_response(error: &PipelineError) -> HttpResponse {
    let body = ErrorBody::from(error);

    match error {
        PipelineError::EmptyQuery => HttpResponse::BadRequest().json(body),
        PipelineError::QuotaExceeded => HttpResponse::TooManyRequests().json(body),
        PipelineError::Service(_) => HttpResponse::BadGateway().json(body),
        PipelineError::Timeout(_) => HttpResponse::GatewayTimeout().json(body),
        PipelineError::Cancelled => HttpResponse::ServiceUnavailable().json(body),
    }
}

fn busy_response() -> HttpResponse {
    HttpResponse::Conflict().json(ErrorBody {
        error: "run_in_progress".to_string(),
        message: "A harvest is already running. Wait for it to finish.".to_string(),
    })
}

fn send_line(lines: &UnboundedSender<web::Bytes>, message: &StreamMessage) {
    match serde_json::to_vec(message) {
        Ok(mut line) => {
            line.push(b'\n');
            // A closed stream means the caller left and the run is being cancelled.
            _ = lines.send(web::Bytes::from(line));
        }
        Err(e) => log::error!("Failed to encode stream message: {}", e),
    }
}

async fn relay_progress(
    run_id: Uuid,
    mut progress_receiver: UnboundedReceiver<ProgressEvent>,
    lines: Option<UnboundedSender<web::Bytes>>,
) {
    while let Some(event) = progress_receiver.recv().await {
        match &event {
            ProgressEvent::PhaseStarted {
                index,
                total,
                label,
            } => log::info!("[{}] Phase {}/{} started: {}", run_id, index, total, label),
            ProgressEvent::PhaseCompleted {
                index,
                total,
                label,
                segment_leads,
                accepted_total,
            } => log::info!(
                "[{}] Phase {}/{} done: {} | {} leads from segment, {} unique so far",
                run_id,
                index,
                total,
                label,
                segment_leads,
                accepted_total
            ),
        }

        if let Some(lines) = &lines {
            send_line(lines, &StreamMessage::Progress(event));
        }
    }
}

#[get("")]
pub async fn harvest_leads(
    harvester: web::Data<Harvester>,
    harvest_settings: web::Data<HarvestSettings>,
    run_gate: web::Data<RunGate>,
    params: web::Query<HarvestQuery>,
) -> HttpResponse {
    if params.query.trim().is_empty() {
        return error_response(&PipelineError::EmptyQuery);
    }

    let Some(_permit) = run_gate.try_enter() else {
        return busy_response();
    };

    let run_id = Uuid::new_v4();
    let profile = harvest_settings.profile(params.mode);
    log::info!(
        "[{}] Harvesting '{}' in {} mode",
        run_id,
        params.query,
        params.mode
    );

    // Dropping this handler (client went away) cancels the run.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let (progress_sender, progress_receiver) = mpsc::unbounded_channel::<ProgressEvent>();
    tokio::spawn(relay_progress(run_id, progress_receiver, None));

    let result = harvester
        .search(&params.query, &profile, Some(&progress_sender), &cancel)
        .await;

    match result {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            log::error!("[{}] Harvest failed: {}", run_id, e);
            error_response(&e)
        }
    }
}

/// Same run as `GET /lead`, answered as newline-delimited JSON: one
/// `progress` line per phase boundary, then a final `result` or `error`.
#[get("/stream")]
pub async fn stream_leads(
    harvester: web::Data<Harvester>,
    harvest_settings: web::Data<HarvestSettings>,
    run_gate: web::Data<RunGate>,
    params: web::Query<HarvestQuery>,
) -> HttpResponse {
    if params.query.trim().is_empty() {
        return error_response(&PipelineError::EmptyQuery);
    }

    let Some(permit) = run_gate.try_enter() else {
        return busy_response();
    };

    let run_id = Uuid::new_v4();
    let profile = harvest_settings.profile(params.mode);
    let query = params.into_inner().query;
    log::info!(
        "[{}] Streaming harvest of '{}' in {} mode",
        run_id,
        query,
        profile.mode
    );

    // The guard rides in the response body, so a dropped connection cancels the run.
    let cancel = CancellationToken::new();
    let cancel_on_drop = cancel.clone().drop_guard();
    let (line_sender, line_receiver) = mpsc::unbounded_channel::<web::Bytes>();

    tokio::spawn(async move {
        let _permit = permit;
        let (progress_sender, progress_receiver) = mpsc::unbounded_channel::<ProgressEvent>();
        let relay = tokio::spawn(relay_progress(
            run_id,
            progress_receiver,
            Some(line_sender.clone()),
        ));

        let result = harvester
            .search(&query, &profile, Some(&progress_sender), &cancel)
            .await;

        // Every progress line goes out before the final one.
        drop(progress_sender);
        if let Err(e) = relay.await {
            log::error!("[{}] Progress relay failed: {}", run_id, e);
        }

        let message = match result {
            Ok(result) => StreamMessage::Result(result),
            Err(e) => {
                log::error!("[{}] Harvest failed: {}", run_id, e);
                StreamMessage::Error(ErrorBody::from(&e))
            }
        };
        send_line(&line_sender, &message);
    });

    let body = stream::unfold(
        (line_receiver, cancel_on_drop),
        |(mut lines, guard)| async move {
            lines
                .recv()
                .await
                .map(|line| (Ok::<_, Infallible>(line), (lines, guard)))
        },
    );

    HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .streaming(body)
}

#[post("/export")]
pub async fn export_leads(leads: web::Json<Vec<LeadRecord>>) -> HttpResponse {
    let unix_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let csv = match leads_to_csv(&leads) {
        Ok(csv) => csv,
        Err(e) => {
            log::error!("CSV export failed: {}", e);
            return HttpResponse::InternalServerError().json(ErrorBody {
                error: "export_failed".to_string(),
                message: e.to_string(),
            });
        }
    };

    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export_file_name(unix_millis)),
        ))
        .body(csv)
}

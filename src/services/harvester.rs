use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    lead::{LeadRecord, LeadSet},
    search::{
        segment_label, AggregationResult, ConcurrencyMode, GroundingSource, ProgressEvent,
        QuotaPolicy, SearchRequest, SegmentFailure,
    },
};

use super::{
    build_segment_prompt, parse_leads, ExtractionRequest, ExtractionService, ServiceError,
};

pub const QUOTA_GUIDANCE: &str =
    "QUOTA_EXHAUSTED: Multi-phase scan requires more API capacity. Please use a personal API key.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Backoff grows linearly: the n-th retry waits n times the base.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

/// How one kind of run (parallel harvest or deep scan) is executed.
#[derive(Debug, Clone)]
pub struct HarvestProfile {
    pub mode: ConcurrencyMode,
    pub segments: Vec<String>,
    pub inter_phase_delay: Duration,
    pub retry: RetryPolicy,
    pub quota_policy: QuotaPolicy,
    pub phone_mandatory: bool,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub grounded: bool,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("still rate limited after {attempts} attempts")]
    QuotaExhausted { attempts: u32 },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Service(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("search query is empty")]
    EmptyQuery,
    #[error("{}", QUOTA_GUIDANCE)]
    QuotaExceeded,
    #[error("{0}")]
    Service(String),
    #[error("segment '{0}' timed out")]
    Timeout(String),
    #[error("search was cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmptyQuery => "empty_query",
            PipelineError::QuotaExceeded => "quota_exceeded",
            PipelineError::Service(_) => "service_failure",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentHarvest {
    pub leads: Vec<LeadRecord>,
    pub sources: Vec<GroundingSource>,
}

// Everything one `aggregate` call accumulates. Never shared between runs.
struct RunState {
    leads: LeadSet,
    sources: Vec<GroundingSource>,
    seen_uris: HashSet<String>,
    failures: Vec<SegmentFailure>,
}

impl RunState {
    fn new(phone_mandatory: bool) -> Self {
        RunState {
            leads: LeadSet::new(phone_mandatory),
            sources: vec![],
            seen_uris: HashSet::new(),
            failures: vec![],
        }
    }

    /// Merges one segment's outcome and returns how many leads it produced.
    fn absorb(
        &mut self,
        label: &str,
        outcome: Result<SegmentHarvest, SegmentError>,
        policy: QuotaPolicy,
    ) -> Result<usize, PipelineError> {
        match outcome {
            Ok(harvest) => {
                let produced = harvest.leads.len();
                self.leads.extend(harvest.leads);
                for source in harvest.sources {
                    if self.seen_uris.insert(source.uri.clone()) {
                        self.sources.push(source);
                    }
                }
                Ok(produced)
            }
            Err(SegmentError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => match policy {
                QuotaPolicy::Isolate => {
                    log::warn!("Segment '{}' contributes nothing: {}", label, e);
                    self.failures.push(SegmentFailure {
                        label: label.to_string(),
                        reason: e.to_string(),
                    });
                    Ok(0)
                }
                QuotaPolicy::Abort => Err(match e {
                    SegmentError::QuotaExhausted { .. } => PipelineError::QuotaExceeded,
                    SegmentError::Timeout(_) => PipelineError::Timeout(label.to_string()),
                    SegmentError::Service(message) => PipelineError::Service(message),
                    SegmentError::Cancelled => PipelineError::Cancelled,
                }),
            },
        }
    }

    fn finish(self, segment_count: usize) -> AggregationResult {
        AggregationResult::new(
            self.leads.into_leads(),
            self.sources,
            self.failures,
            segment_count,
        )
    }
}

fn notify(progress: Option<&UnboundedSender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(sender) = progress {
        // The receiver going away must not stop the run.
        _ = sender.send(event);
    }
}

/// Lead aggregation pipeline over one extraction service.
pub struct Harvester {
    service: Arc<dyn ExtractionService>,
    model: ModelSettings,
}

impl Harvester {
    pub fn new(service: Arc<dyn ExtractionService>, model: ModelSettings) -> Self {
        Harvester { service, model }
    }

    /// Runs one segment, retrying while the service reports rate limits.
    ///
    /// A response that cannot be parsed yields an empty harvest rather than
    /// an error.
    pub async fn run_segment(
        &self,
        query: &str,
        modifier: &str,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<SegmentHarvest, SegmentError> {
        let label = segment_label(modifier);
        let format = self.service.default_format();
        let request = ExtractionRequest {
            prompt: build_segment_prompt(query, modifier, format),
            model: self.model.model.clone(),
            grounded: self.model.grounded,
            temperature: self.model.temperature,
            format,
        };

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            log::info!("Segment '{}' attempt {}", label, attempts);

            let call = tokio::time::timeout(
                self.model.request_timeout,
                self.service.generate(&request),
            );
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(SegmentError::Cancelled),
                outcome = call => outcome,
            };

            match outcome {
                Err(_) => {
                    log::error!(
                        "Segment '{}' timed out after {:?}",
                        label,
                        self.model.request_timeout
                    );
                    return Err(SegmentError::Timeout(self.model.request_timeout));
                }
                Ok(Ok(response)) => {
                    let leads = match parse_leads(&response.body) {
                        Some(leads) => leads,
                        None => {
                            log::warn!("Segment '{}' returned no decodable lead list", label);
                            vec![]
                        }
                    };
                    log::info!("Segment '{}' extracted {} leads", label, leads.len());

                    return Ok(SegmentHarvest {
                        leads,
                        sources: response.sources,
                    });
                }
                Ok(Err(ServiceError::RateLimited(message))) => {
                    if attempts > retry.max_retries {
                        log::error!(
                            "Segment '{}' gave up after {} attempts: {}",
                            label,
                            attempts,
                            message
                        );
                        return Err(SegmentError::QuotaExhausted { attempts });
                    }

                    let backoff = retry.backoff_for(attempts);
                    log::warn!(
                        "Segment '{}' rate limited, retrying in {:?}: {}",
                        label,
                        backoff,
                        message
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SegmentError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Ok(Err(ServiceError::Other(message))) => {
                    log::error!("Segment '{}' failed: {}", label, message);
                    return Err(SegmentError::Service(message));
                }
            }
        }
    }

    /// Runs every segment of `request` and merges the results in segment
    /// order. Progress events carry 1-based phase indexes.
    pub async fn aggregate(
        &self,
        request: &SearchRequest,
        profile: &HarvestProfile,
        progress: Option<&UnboundedSender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> Result<AggregationResult, PipelineError> {
        if request.query.trim().is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        let segments = request.segments();
        let total = segments.len();
        let mut state = RunState::new(profile.phone_mandatory);

        log::info!(
            "Harvesting '{}' over {} segments ({})",
            request.query,
            total,
            profile.mode
        );

        match profile.mode {
            ConcurrencyMode::Parallel => {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                for (i, modifier) in segments.iter().enumerate() {
                    notify(
                        progress,
                        ProgressEvent::PhaseStarted {
                            index: i + 1,
                            total,
                            label: segment_label(modifier),
                        },
                    );
                }

                let outcomes = join_all(segments.iter().map(|modifier| {
                    self.run_segment(&request.query, modifier, &profile.retry, cancel)
                }))
                .await;

                for (i, (modifier, outcome)) in segments.iter().zip(outcomes).enumerate() {
                    let label = segment_label(modifier);
                    let produced = state.absorb(&label, outcome, profile.quota_policy)?;
                    notify(
                        progress,
                        ProgressEvent::PhaseCompleted {
                            index: i + 1,
                            total,
                            label,
                            segment_leads: produced,
                            accepted_total: state.leads.len(),
                        },
                    );
                }
            }
            ConcurrencyMode::SequentialThrottled => {
                for (i, modifier) in segments.iter().enumerate() {
                    if cancel.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    if i > 0 && !profile.inter_phase_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                            _ = tokio::time::sleep(profile.inter_phase_delay) => {}
                        }
                    }

                    let label = segment_label(modifier);
                    notify(
                        progress,
                        ProgressEvent::PhaseStarted {
                            index: i + 1,
                            total,
                            label: label.clone(),
                        },
                    );

                    let outcome = self
                        .run_segment(&request.query, modifier, &profile.retry, cancel)
                        .await;
                    let produced = state.absorb(&label, outcome, profile.quota_policy)?;
                    notify(
                        progress,
                        ProgressEvent::PhaseCompleted {
                            index: i + 1,
                            total,
                            label,
                            segment_leads: produced,
                            accepted_total: state.leads.len(),
                        },
                    );
                }
            }
        }

        let result = state.finish(total);
        log::info!(
            "Harvest of '{}' finished with {} unique leads",
            request.query,
            result.count
        );

        Ok(result)
    }

    /// Runs the profile's own segments for `query`.
    pub async fn search(
        &self,
        query: &str,
        profile: &HarvestProfile,
        progress: Option<&UnboundedSender<ProgressEvent>>,
        cancel: &CancellationToken,
    ) -> Result<AggregationResult, PipelineError> {
        let request = SearchRequest::new(query, profile.segments.clone());
        self.aggregate(&request, profile, progress, cancel).await
    }
}

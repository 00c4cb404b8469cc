use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

use common::{
    knobs,
    runtime::{
        Runtime,
        UnixTimestamp,
    },
};
use parking_lot::Mutex;
use rand::Rng;

use crate::{
    context::TraceContext,
    export::{
        ExportedSpan,
        ExportedTrace,
        SpanExporter,
    },
    ids,
    metrics::{
        log_span_ended,
        log_spans_flushed,
    },
    sampler::{
        Sampler,
        SamplingContext,
    },
    span::{
        Attributes,
        Span,
        SpanKind,
        SpanLink,
    },
};

pub struct TracerConfig {
    pub service_name: String,
    /// Merged into the exported resource; `service.name` is always forced
    /// to `service_name`.
    pub resource_attributes: BTreeMap<String, String>,
    /// Probabilistic fallback rate in [0, 1], used when no custom sampler
    /// is configured and there is no parent decision to inherit.
    pub sample_rate: f64,
    pub sampler: Option<Arc<dyn Sampler>>,
    pub exporter: Option<Arc<dyn SpanExporter>>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            service_name: knobs::TRACE_SERVICE_NAME.clone(),
            resource_attributes: BTreeMap::new(),
            sample_rate: *knobs::TRACE_SAMPLE_RATE,
            sampler: None,
            exporter: None,
        }
    }
}

/// Options for [`Tracer::start_span`]. `parent` wins over `parent_context`;
/// with neither, a fresh trace is started.
#[derive(Default)]
pub struct SpanOptions<'a, RT: Runtime> {
    pub parent: Option<&'a Span<RT>>,
    pub parent_context: Option<&'a TraceContext>,
    pub kind: SpanKind,
    pub attributes: Attributes,
    pub links: Vec<SpanLink>,
    pub start_time: Option<UnixTimestamp>,
}

impl<RT: Runtime> SpanOptions<'_, RT> {
    pub fn new() -> Self {
        Self {
            parent: None,
            parent_context: None,
            kind: SpanKind::default(),
            attributes: Attributes::new(),
            links: Vec::new(),
            start_time: None,
        }
    }
}

struct Collector {
    pending: Mutex<Vec<ExportedSpan>>,
    shutdown: AtomicBool,
}

/// Owns span creation, the pending-span buffer, and the flush pipeline for
/// one process. Construct one per process at init and pass references
/// explicitly.
pub struct Tracer<RT: Runtime> {
    runtime: RT,
    config: TracerConfig,
    collector: Arc<Collector>,
}

impl<RT: Runtime> Tracer<RT> {
    pub fn new(runtime: RT, config: TracerConfig) -> Self {
        Self {
            runtime,
            config,
            collector: Arc::new(Collector {
                pending: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn start_span(&self, name: &str, opts: SpanOptions<'_, RT>) -> Arc<Span<RT>> {
        let mut rng = self.runtime.rng();
        let span_id = ids::generate_span_id(&mut *rng);

        let (trace_id, parent_span_id, inherited) = if let Some(parent) = opts.parent {
            (
                parent.trace_id().to_string(),
                Some(parent.span_id().to_string()),
                Some(parent.is_sampled()),
            )
        } else if let Some(context) = opts.parent_context {
            (
                context.trace_id.clone(),
                Some(context.span_id.clone()),
                Some(context.sampled),
            )
        } else {
            (ids::generate_trace_id(&mut *rng), None, None)
        };

        let mut attributes = opts.attributes;
        let sampled = match inherited {
            Some(decision) => decision,
            None => match &self.config.sampler {
                Some(sampler) => {
                    let decision = sampler.sample(
                        &SamplingContext {
                            trace_id: trace_id.clone(),
                            parent_span_id: parent_span_id.clone(),
                        },
                        name,
                    );
                    attributes.extend(decision.attributes);
                    decision.sampled
                },
                None => match self.config.sample_rate {
                    rate if rate <= 0.0 => false,
                    rate if rate >= 1.0 => true,
                    rate => rng.random::<f64>() < rate,
                },
            },
        };

        let start = opts.start_time.unwrap_or_else(|| self.runtime.unix_timestamp());
        let collector = self.collector.clone();
        let on_end = Box::new(move |snapshot: ExportedSpan| {
            // Shutdown disables collection; the span itself still works.
            if collector.shutdown.load(Ordering::SeqCst) {
                return;
            }
            log_span_ended();
            collector.pending.lock().push(snapshot);
        });
        Span::new(
            self.runtime.clone(),
            trace_id,
            span_id,
            parent_span_id,
            sampled,
            name.to_string(),
            opts.kind,
            start,
            attributes,
            opts.links,
            Some(on_end),
        )
    }

    /// The propagatable context of a live span.
    pub fn create_context(&self, span: &Span<RT>) -> TraceContext {
        TraceContext {
            trace_id: span.trace_id().to_string(),
            span_id: span.span_id().to_string(),
            parent_span_id: span.parent_span_id().map(str::to_string),
            sampled: span.is_sampled(),
            trace_state: None,
        }
    }

    /// Drain every sampled, ended span into one exported trace. The buffer
    /// clears even when no exporter is configured, and exporter failures
    /// are swallowed: tracing must never take down the invocation plane.
    pub async fn flush(&self) {
        let spans = {
            let mut pending = self.collector.pending.lock();
            std::mem::take(&mut *pending)
        };
        if spans.is_empty() {
            return;
        }
        log_spans_flushed(spans.len() as u64);
        let Some(exporter) = &self.config.exporter else {
            return;
        };
        let mut resource = self.config.resource_attributes.clone();
        resource.insert("service.name".to_string(), self.config.service_name.clone());
        let trace = ExportedTrace {
            service_name: self.config.service_name.clone(),
            spans,
            resource,
        };
        if let Err(e) = exporter.export(&trace).await {
            tracing::warn!("Trace export failed: {e:#}");
        }
    }

    /// Disable further span collection. Already-created spans still mutate
    /// and end locally, but their end events are no longer enqueued.
    pub fn shutdown(&self) {
        self.collector.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn pending_span_count(&self) -> usize {
        self.collector.pending.lock().len()
    }
}

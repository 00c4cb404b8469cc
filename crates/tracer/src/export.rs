//! Exported trace shapes and the pluggable exporter sinks.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{
    Deserialize,
    Serialize,
};

use crate::span::{
    Attributes,
    SpanKind,
    SpanStatus,
    SpanLink,
};

/// One span in OpenTelemetry JSON shape. Times are unix nanoseconds;
/// `endTimeUnixNano` is omitted while unended and `links` when empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time_unix_nano: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time_unix_nano: Option<u64>,
    pub attributes: Attributes,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub links: Vec<SpanLink>,
}

impl ExportedSpan {
    pub fn duration_ms(&self) -> u64 {
        match self.end_time_unix_nano {
            Some(end) => end.saturating_sub(self.start_time_unix_nano) / 1_000_000,
            None => 0,
        }
    }
}

/// A flushed trace: every sampled span that ended since the last flush,
/// under the configured service identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTrace {
    pub service_name: String,
    pub spans: Vec<ExportedSpan>,
    /// `service.name` always equals `service_name`; configured resource
    /// attributes merge over it.
    pub resource: BTreeMap<String, String>,
}

#[async_trait]
pub trait SpanExporter: Send + Sync {
    async fn export(&self, trace: &ExportedTrace) -> anyhow::Result<()>;
}

/// The transport half of the batching exporter, injected so tests and
/// alternative transports can observe exactly what would go on the wire.
pub type SendFn =
    Arc<dyn Fn(ExportedTrace) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Splits a trace into span batches of `batch_size`, each wrapped in a full
/// `ExportedTrace` preserving the service identity. A failed batch is
/// logged and swallowed; later batches still go out.
pub struct OtelBatchExporter {
    batch_size: usize,
    send: SendFn,
}

impl OtelBatchExporter {
    pub fn new(batch_size: usize, send: SendFn) -> Self {
        Self { batch_size, send }
    }

    /// POST each batch as JSON to `endpoint` with the given extra headers.
    pub fn http(endpoint: String, headers: Vec<(String, String)>) -> Self {
        let client = reqwest::Client::new();
        let send: SendFn = Arc::new(move |trace: ExportedTrace| {
            let client = client.clone();
            let endpoint = endpoint.clone();
            let headers = headers.clone();
            Box::pin(async move {
                let mut request = client.post(&endpoint).json(&trace);
                for (name, value) in &headers {
                    request = request.header(name, value);
                }
                let response = request.send().await?;
                response.error_for_status()?;
                Ok(())
            })
        });
        Self::new(*common::knobs::TRACE_EXPORT_BATCH_SIZE, send)
    }
}

#[async_trait]
impl SpanExporter for OtelBatchExporter {
    async fn export(&self, trace: &ExportedTrace) -> anyhow::Result<()> {
        for batch in trace.spans.chunks(self.batch_size.max(1)) {
            let batch_trace = ExportedTrace {
                service_name: trace.service_name.clone(),
                spans: batch.to_vec(),
                resource: trace.resource.clone(),
            };
            if let Err(e) = (self.send)(batch_trace).await {
                tracing::warn!("Failed to export a span batch: {e:#}");
            }
        }
        Ok(())
    }
}

/// Logs a single-line summary per span.
pub struct ConsoleExporter;

#[async_trait]
impl SpanExporter for ConsoleExporter {
    async fn export(&self, trace: &ExportedTrace) -> anyhow::Result<()> {
        for span in &trace.spans {
            tracing::info!(
                "[{}] span {} trace={} span={} duration={}ms",
                trace.service_name,
                span.name,
                span.trace_id,
                span.span_id,
                span.duration_ms(),
            );
        }
        Ok(())
    }
}

/// Discards everything.
pub struct NoopExporter;

#[async_trait]
impl SpanExporter for NoopExporter {
    async fn export(&self, _trace: &ExportedTrace) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    };

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::span::SpanKind;

    fn span(i: usize) -> ExportedSpan {
        ExportedSpan {
            trace_id: "a".repeat(32),
            span_id: format!("{i:016x}"),
            parent_span_id: None,
            name: format!("span-{i}"),
            kind: SpanKind::Internal,
            start_time_unix_nano: 1_000,
            end_time_unix_nano: Some(3_500_000 + 1_000),
            attributes: Default::default(),
            status: Default::default(),
            links: Vec::new(),
        }
    }

    fn trace(n: usize) -> ExportedTrace {
        ExportedTrace {
            service_name: "lattice-backend".to_string(),
            spans: (0..n).map(span).collect(),
            resource: BTreeMap::from([(
                "service.name".to_string(),
                "lattice-backend".to_string(),
            )]),
        }
    }

    #[tokio::test]
    async fn test_batches_preserve_identity_and_split_spans() {
        let batches: Arc<Mutex<Vec<ExportedTrace>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let exporter = OtelBatchExporter::new(
            100,
            Arc::new(move |t| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().push(t);
                    Ok(())
                })
            }),
        );
        exporter.export(&trace(250)).await.unwrap();
        let batches = batches.lock();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].spans.len(), 100);
        assert_eq!(batches[2].spans.len(), 50);
        for batch in batches.iter() {
            assert_eq!(batch.service_name, "lattice-backend");
            assert_eq!(batch.resource["service.name"], "lattice-backend");
        }
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_abort_later_batches() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let exporter = OtelBatchExporter::new(
            10,
            Arc::new(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if n == 0 {
                        anyhow::bail!("collector unavailable");
                    }
                    Ok(())
                })
            }),
        );
        exporter.export(&trace(30)).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exported_span_wire_shape() {
        let mut s = span(1);
        s.end_time_unix_nano = None;
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("endTimeUnixNano").is_none());
        assert!(json.get("links").is_none());
        assert_eq!(json["startTimeUnixNano"], 1_000);
        assert_eq!(json["kind"], "internal");
        assert_eq!(json["status"]["code"], "unset");
        assert_eq!(s.duration_ms(), 0);
    }

    #[test]
    fn test_duration_ms() {
        let s = span(1);
        assert_eq!(s.duration_ms(), 3);
    }
}

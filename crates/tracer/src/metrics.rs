use ::metrics::register_lattice_counter;

register_lattice_counter!(TRACER_SPANS_ENDED_TOTAL, "Sampled spans enqueued for export");

register_lattice_counter!(TRACER_SPANS_FLUSHED_TOTAL, "Spans drained by flush");

pub fn log_span_ended() {
    TRACER_SPANS_ENDED_TOTAL.inc();
}

pub fn log_spans_flushed(count: u64) {
    TRACER_SPANS_FLUSHED_TOTAL.inc_by(count);
}

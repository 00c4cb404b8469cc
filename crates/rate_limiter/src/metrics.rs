use ::metrics::register_lattice_counter;

register_lattice_counter!(
    RATE_LIMIT_REQUESTS_TOTAL,
    "Requests admitted by the rate limiter",
    &["category"]
);

register_lattice_counter!(
    RATE_LIMIT_REJECTIONS_TOTAL,
    "Requests rejected by the rate limiter",
    &["category"]
);

pub fn log_request_allowed(category: &str) {
    RATE_LIMIT_REQUESTS_TOTAL.with_label_values(&[category]).inc();
}

pub fn log_request_rejected(category: &str) {
    RATE_LIMIT_REJECTIONS_TOTAL.with_label_values(&[category]).inc();
}

use ::metrics::{
    register_lattice_counter,
    register_lattice_histogram,
    Timer,
};

register_lattice_counter!(
    CODE_EXECUTIONS_TOTAL,
    "Code executions by final status",
    &["status"]
);

register_lattice_histogram!(
    CODE_EXECUTE_SECONDS,
    "Wall-clock time of one code execution"
);

register_lattice_counter!(COMPILE_CACHE_HITS_TOTAL, "Compile cache hits");
register_lattice_counter!(COMPILE_CACHE_MISSES_TOTAL, "Compile cache misses");
register_lattice_counter!(COMPILE_CACHE_EVICTIONS_TOTAL, "Compile cache evictions");

pub fn execute_timer() -> Timer<'static> {
    Timer::new(&CODE_EXECUTE_SECONDS)
}

pub fn log_execution(status: &str) {
    CODE_EXECUTIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn log_cache_hit() {
    COMPILE_CACHE_HITS_TOTAL.inc();
}

pub fn log_cache_miss() {
    COMPILE_CACHE_MISSES_TOTAL.inc();
}

pub fn log_cache_eviction() {
    COMPILE_CACHE_EVICTIONS_TOTAL.inc();
}

use ::metrics::{
    register_lattice_counter,
    register_lattice_histogram,
    Timer,
};

register_lattice_counter!(
    AGENTIC_EXECUTIONS_TOTAL,
    "Agentic executions by final status",
    &["status"]
);

register_lattice_histogram!(
    AGENTIC_EXECUTE_SECONDS,
    "Wall-clock time of one agentic execution"
);

register_lattice_counter!(
    AGENTIC_MODEL_CALLS_TOTAL,
    "Model completions requested by the agentic loop",
    &["model"]
);

register_lattice_counter!(
    AGENTIC_TOOL_CALLS_TOTAL,
    "Tool handler invocations",
    &["tool"]
);

pub fn execute_timer() -> Timer<'static> {
    Timer::new(&AGENTIC_EXECUTE_SECONDS)
}

pub fn log_execution(status: &str) {
    AGENTIC_EXECUTIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn log_model_call(model: &str) {
    AGENTIC_MODEL_CALLS_TOTAL.with_label_values(&[model]).inc();
}

pub fn log_tool_call(tool: &str) {
    AGENTIC_TOOL_CALLS_TOTAL.with_label_values(&[tool]).inc();
}

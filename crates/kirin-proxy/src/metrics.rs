use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Request counters
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("kirin_requests_total", "Total number of requests by route and status"),
        &["route", "status"],
    )
    .expect("valid metric definition")
});

// Protocol counters
pub static CHALLENGES_ISSUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("kirin_challenges_issued_total", "Payment challenges issued"),
        &["route"],
    )
    .expect("valid metric definition")
});

pub static TOKENS_ADMITTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("kirin_tokens_admitted_total", "Requests admitted with a paid token"),
        &["route"],
    )
    .expect("valid metric definition")
});

pub static VERIFY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("kirin_verify_failures_total", "Token verification failures by reason"),
        &["reason"],
    )
    .expect("valid metric definition")
});

pub static PAYMENT_BACKEND_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kirin_payment_backend_errors_total",
        "Requests failed because the payment backend was unavailable",
    )
    .expect("valid metric definition")
});

// Upstream metrics
pub static UPSTREAM_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "kirin_upstream_errors_total",
        "Proxied requests that failed to reach the backend",
    )
    .expect("valid metric definition")
});

pub static UPSTREAM_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("kirin_upstream_latency_seconds", "Time to backend response headers")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("valid metric definition")
});

/// Register all metrics with the registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CHALLENGES_ISSUED.clone()))?;
    REGISTRY.register(Box::new(TOKENS_ADMITTED.clone()))?;
    REGISTRY.register(Box::new(VERIFY_FAILURES.clone()))?;
    REGISTRY.register(Box::new(PAYMENT_BACKEND_ERRORS.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_ERRORS.clone()))?;
    REGISTRY.register(Box::new(UPSTREAM_LATENCY.clone()))?;
    Ok(())
}

//! # Telemetry Features
//!
//! Console logging through `tracing-subscriber` is always on. OpenTelemetry
//! export is optional and selected with cargo features.
//!
//! ## Feature matrix
//!
//! - `otel`: Exports spans (one per multiplication, one per dispatched row).
//! - `metrics`: Exports counters and histograms for multiplications, rows and
//!   the pool size.
//! - `stdout`: Prints exported spans and metrics to stdout.
//!
//! ## Feature constraints
//!
//! - `stdout` requires at least one of `otel` or `metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --bin mulmatrix-master --features otel,metrics,stdout
//! ```
//!
//! Verbosity follows `RUST_LOG` and defaults to `info`.

#[cfg(all(feature = "stdout", not(any(feature = "otel", feature = "metrics"))))]
compile_error!("The 'stdout' feature requires at least one of 'otel' or 'metrics' to be enabled.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "otel"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "metrics", feature = "otel"))]
const SERVICE_NAME: &str = "mulmatrix";

/// Exporter handles. Keep them alive for the lifetime of the process and call
/// [`TelemetryProviders::shutdown`] before exiting so buffered data is flushed.
pub struct TelemetryProviders {
    #[cfg(feature = "otel")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    pub fn shutdown(self) {
        #[cfg(feature = "otel")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber for the master process.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "metrics", feature = "otel"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Installs a single-line subscriber for a worker process.
///
/// Worker output is captured line by line by the master and re-logged under
/// the worker's slot, so no colours, no timestamps and no multi-line layout.
pub fn init_worker_logging() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .without_time()
                .compact(),
        )
        .try_init()?;
    Ok(())
}

#[cfg(any(feature = "metrics", feature = "otel"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "otel")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    builder.build()
}

#[cfg(feature = "metrics")]
static MULTIPLIES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MULTIPLIES_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MULTIPLY_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MULTIPLY_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ROWS_DISPATCHED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ROWS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ROW_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_SIZE: OnceLock<Gauge<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_RESIZES: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = MULTIPLIES.set(
        meter
            .u64_counter("multiplies")
            .with_description("Total matrix multiplications requested")
            .build(),
    );

    let _ = MULTIPLIES_INFLIGHT.set(
        meter
            .i64_up_down_counter("multiplies_inflight")
            .with_description("Concurrent matrix multiplications")
            .build(),
    );

    let _ = MULTIPLY_ERRORS.set(
        meter
            .u64_counter("multiply_errors")
            .with_description("Failed matrix multiplications")
            .build(),
    );

    let _ = MULTIPLY_DURATION_MS.set(
        meter
            .f64_histogram("multiply_duration")
            .with_unit("ms")
            .with_description("End-to-end multiplication duration")
            .build(),
    );

    let _ = ROWS_DISPATCHED.set(
        meter
            .u64_counter("rows_dispatched")
            .with_description("Rows sent to workers")
            .build(),
    );

    let _ = ROWS_INFLIGHT.set(
        meter
            .i64_up_down_counter("rows_inflight")
            .with_description("Outstanding MulRow calls")
            .build(),
    );

    let _ = ROW_ERRORS.set(
        meter
            .u64_counter("row_errors")
            .with_description("Failed MulRow calls")
            .build(),
    );

    let _ = POOL_SIZE.set(
        meter
            .u64_gauge("pool_size")
            .with_description("Workers eligible for rows")
            .build(),
    );

    let _ = POOL_RESIZES.set(
        meter
            .u64_counter("pool_resizes")
            .with_description("Successful pool resizes")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub fn increment_multiplies() {
    if let Some(counter) = MULTIPLIES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_multiplies() {}

#[cfg(feature = "metrics")]
pub fn increment_multiplies_inflight() {
    if let Some(counter) = MULTIPLIES_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_multiplies_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_multiplies_inflight() {
    if let Some(counter) = MULTIPLIES_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_multiplies_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_multiply_errors() {
    if let Some(counter) = MULTIPLY_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_multiply_errors() {}

#[cfg(feature = "metrics")]
pub fn record_multiply_duration(duration_ms: f64) {
    if let Some(histogram) = MULTIPLY_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_multiply_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_rows_dispatched() {
    if let Some(counter) = ROWS_DISPATCHED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_rows_dispatched() {}

#[cfg(feature = "metrics")]
pub fn increment_row_errors() {
    if let Some(counter) = ROW_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_row_errors() {}

#[cfg(feature = "metrics")]
pub fn record_pool_size(size: u64) {
    if let Some(gauge) = POOL_SIZE.get() {
        gauge.record(size, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_pool_size(_size: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_pool_resizes() {
    if let Some(counter) = POOL_RESIZES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_pool_resizes() {}

/// Counts one outstanding `MulRow` call for as long as it is alive.
///
/// Dropping the guard decrements the gauge, including when the owning task is
/// aborted.
pub struct RowInFlight(());

impl RowInFlight {
    pub fn enter() -> Self {
        #[cfg(feature = "metrics")]
        if let Some(counter) = ROWS_INFLIGHT.get() {
            counter.add(1, &[]);
        }
        Self(())
    }
}

impl Drop for RowInFlight {
    fn drop(&mut self) {
        #[cfg(feature = "metrics")]
        if let Some(counter) = ROWS_INFLIGHT.get() {
            counter.add(-1, &[]);
        }
    }
}

//! Shared tracing setup for the fieldgrid workspace.
//!
//! Binaries, integration tests and benchmarks install their `tracing`
//! subscriber through this crate so every process logs mesh reconfiguration,
//! buffer lifecycle and transfer events with the same filter and format
//! rules. Library crates never install a subscriber themselves; they only
//! emit events.

pub mod performance;

#[macro_use]
pub mod macros;

use std::collections::HashSet;
use std::env;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::format::{FmtSpan, Writer};
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Environment variable prefix shared by every tracing knob.
const ENV_PREFIX: &str = "FIELDGRID_";

/// How the shared subscriber filters and formats events.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives (e.g. `fieldgrid_core=debug,info`). When
    /// absent, `RUST_LOG` is consulted and then [`Self::default_directive`].
    pub directives: Option<String>,
    /// Directive used when nothing else resolves to a valid filter.
    pub default_directive: String,
    /// Whether event targets (module paths) appear in the output.
    pub include_targets: bool,
    /// ANSI colouring. Forced off for JSON output.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter flavour.
    pub output: TracingOutput,
    /// Field names whose values are replaced before formatting.
    pub redacted_fields: Vec<String>,
    /// Replacement text for redacted values.
    pub redaction_text: String,
    /// Whether [`performance::PerformanceSpan`] guards report timings.
    pub enable_performance_tracing: bool,
    /// Minimum duration (µs) for a performance span to be reported.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for interactive runs.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            redacted_fields: Vec::new(),
            redaction_text: "***REDACTED***".to_string(),
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
        }
    }

    /// JSON lines without colour, for CI and log collectors.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            ..Self::for_local()
        }
    }

    /// JSON output with span timings and debug-level events from the
    /// device and lifecycle crates. Use this when profiling transfers.
    pub fn for_performance() -> Self {
        Self {
            directives: Some("fieldgrid_backends=debug,fieldgrid_core=debug,info".to_string()),
            ansi: false,
            span_events: FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE,
            output: TracingOutput::Json,
            enable_performance_tracing: true,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `FIELDGRID_TRACING_PROFILE` - `local` (default), `ci` or `performance`
    /// - `FIELDGRID_TRACING_DIRECTIVES` - filter directives
    /// - `FIELDGRID_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `FIELDGRID_TRACING_REDACT_FIELDS` - comma-separated field names
    /// - `FIELDGRID_TRACING_REDACT_TOKEN` - replacement text
    /// - `FIELDGRID_PERF_TRACING` - `true`/`1`/`yes` enables performance spans
    /// - `FIELDGRID_PERF_THRESHOLD_US` - minimum reported span duration
    pub fn from_env() -> Self {
        let profile = env_var("TRACING_PROFILE")
            .unwrap_or_else(|| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Some(directives) = env_var("TRACING_DIRECTIVES") {
            config.directives = Some(directives);
        }

        if let Some(output) = env_var("TRACING_FORMAT").and_then(|value| TracingOutput::from_env_value(&value)) {
            if output == TracingOutput::Json {
                config.ansi = false;
            }
            config.output = output;
        }

        if let Some(fields) = env_var("TRACING_REDACT_FIELDS") {
            let fields: Vec<String> = fields
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect();
            if !fields.is_empty() {
                config.redacted_fields = fields;
            }
        }

        if let Some(token) = env_var("TRACING_REDACT_TOKEN") {
            config.redaction_text = token;
        }

        if let Some(flag) = env_var("PERF_TRACING") {
            config.enable_performance_tracing =
                flag == "1" || flag.eq_ignore_ascii_case("true") || flag.eq_ignore_ascii_case("yes");
        }

        if let Some(threshold) = env_var("PERF_THRESHOLD_US").and_then(|value| value.parse::<u64>().ok()) {
            config.performance_threshold_us = Some(threshold);
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Read `FIELDGRID_<suffix>`, treating blank values as unset.
fn env_var(suffix: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Errors surfaced while installing the shared subscriber.
#[derive(Debug)]
pub enum TracingSetupError {
    /// A directive string could not be parsed.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => write!(f, "invalid tracing directive: {msg}"),
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            TracingSetupError::InvalidFilter(_) => None,
        }
    }
}

/// Build a subscriber from the configuration without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, fmt_layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(fmt_layer).with(filter))
}

/// Build the filter and formatter layers for callers composing their own
/// subscriber (e.g. adding a flame-graph layer in a benchmark).
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let redaction = Redaction::new(config);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (&config.output, redaction) {
        (TracingOutput::Compact, None) => Box::new(
            tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone()),
        ),
        (TracingOutput::Compact, Some(redaction)) => Box::new(
            tracing_fmt::layer()
                .compact()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone())
                .fmt_fields(RedactingFields::text(redaction)),
        ),
        (TracingOutput::Pretty, None) => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone()),
        ),
        (TracingOutput::Pretty, Some(redaction)) => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(config.include_targets)
                .with_ansi(config.ansi)
                .with_span_events(config.span_events.clone())
                .fmt_fields(RedactingFields::text(redaction)),
        ),
        (TracingOutput::Json, None) => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_ansi(false)
                .with_span_events(config.span_events.clone()),
        ),
        (TracingOutput::Json, Some(redaction)) => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(config.include_targets)
                .with_ansi(false)
                .with_span_events(config.span_events.clone())
                .fmt_fields(RedactingFields::json(redaction)),
        ),
    };

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default.
///
/// Also applies the config's performance settings through
/// [`performance::configure`].
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)?;
    performance::configure(config.enable_performance_tracing, config.performance_threshold_us);
    Ok(())
}

#[derive(Clone)]
struct Redaction {
    fields: Arc<HashSet<String>>,
    replacement: Arc<str>,
}

impl Redaction {
    fn new(config: &TracingConfig) -> Option<Self> {
        if config.redacted_fields.is_empty() {
            return None;
        }
        Some(Self {
            fields: Arc::new(config.redacted_fields.iter().cloned().collect()),
            replacement: Arc::from(config.redaction_text.as_str()),
        })
    }
}

#[derive(Clone, Copy)]
enum FieldStyle {
    Text,
    Json,
}

/// Field formatter that swaps configured field values for the redaction
/// token. One visitor serves both the text and JSON formatters.
#[derive(Clone)]
struct RedactingFields {
    redaction: Redaction,
    style: FieldStyle,
}

impl RedactingFields {
    fn text(redaction: Redaction) -> Self {
        Self {
            redaction,
            style: FieldStyle::Text,
        }
    }

    fn json(redaction: Redaction) -> Self {
        Self {
            redaction,
            style: FieldStyle::Json,
        }
    }
}

impl<'writer> FormatFields<'writer> for RedactingFields {
    fn format_fields<R>(&self, mut writer: Writer<'writer>, fields: R) -> fmt::Result
    where
        R: RecordFields,
    {
        let mut collector = FieldCollector {
            entries: Vec::new(),
            redaction: &self.redaction,
        };
        fields.record(&mut collector);

        match self.style {
            FieldStyle::Text => {
                for (index, (key, value)) in collector.entries.iter().enumerate() {
                    if index > 0 {
                        writer.write_char(' ')?;
                    }
                    let rendered = match value {
                        JsonValue::String(text) => format!("{text:?}"),
                        other => other.to_string(),
                    };
                    write!(writer, "{key}={rendered}")?;
                }
                Ok(())
            }
            FieldStyle::Json => {
                let object: JsonMap<String, JsonValue> = collector.entries.into_iter().collect();
                let serialized = serde_json::to_string(&JsonValue::Object(object)).map_err(|_| fmt::Error)?;
                writer.write_str(&serialized)
            }
        }
    }
}

struct FieldCollector<'a> {
    entries: Vec<(String, JsonValue)>,
    redaction: &'a Redaction,
}

impl FieldCollector<'_> {
    fn push(&mut self, field: &Field, value: JsonValue) {
        let value = if self.redaction.fields.contains(field.name()) {
            JsonValue::String(self.redaction.replacement.to_string())
        } else {
            value
        };
        self.entries.push((field.name().to_string(), value));
    }
}

impl Visit for FieldCollector<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, JsonValue::String(format!("{value:?}")));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, JsonValue::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, JsonValue::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, JsonValue::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = JsonNumber::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(value.to_string()));
        self.push(field, value);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, JsonValue::String(value.to_string()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        self.push(field, JsonValue::String(value.to_string()));
    }
}

/// Output format choices for the formatter layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

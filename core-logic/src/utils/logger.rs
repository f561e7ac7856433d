use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Targets,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, FormattedFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

/// Install the global subscriber: an hourly rolling file under `logs/` and
/// a colored console. `task_result` lines always reach both. `debug` raises
/// console verbosity for everything else; `RUST_LOG` overrides the console
/// filter when set.
pub fn setup_logger(debug: bool) -> Option<WorkerGuard> {
    std::fs::create_dir_all("logs").ok();

    let file_appender = tracing_appender::rolling::hourly("logs", "engage");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: INFO for task_result, WARN for others (INFO in debug)
    let file_filter = Targets::new()
        .with_target("task_result", Level::INFO)
        .with_default(if debug { Level::INFO } else { Level::WARN });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("task_result=info,engage_core=debug,warn")
        } else {
            EnvFilter::new("task_result=info,error")
        }
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(TerminalFormatter)
        .with_filter(console_filter);

    // try_init so a second call (tests, embedding) is a no-op
    if tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_err()
    {
        return None;
    }

    Some(guard)
}

// --- Formatters ---

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

fn message_of(event: &Event<'_>) -> String {
    let mut visitor = MessageVisitor {
        message: String::new(),
    };
    event.record(&mut visitor);
    visitor.message
}

/// Fields of the enclosing spans, outermost first, e.g.
/// `[identity handle=alice][worker worker_id="01"] `.
fn span_prefix<S, N>(ctx: &FmtContext<'_, S, N>) -> String
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let mut prefix = String::new();
    if let Some(scope) = ctx.event_scope() {
        for span in scope.from_root() {
            let extensions = span.extensions();
            match extensions.get::<FormattedFields<N>>() {
                Some(fields) if !fields.is_empty() => {
                    prefix.push_str(&format!("[{} {}] ", span.name(), fields));
                }
                _ => prefix.push_str(&format!("[{}] ", span.name())),
            }
        }
    }
    prefix
}

pub struct TerminalFormatter;

impl<S, N> FormatEvent<S, N> for TerminalFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let msg = message_of(event);

        let colored_msg = if msg.contains("Success") {
            let green_text = Style::new().fg(Color::LightGreen).bold();
            msg.replace("Success", &format!("{}", green_text.paint("Success")))
        } else if msg.contains("Failed") {
            let red_text = Style::new().fg(Color::LightRed).bold();
            msg.replace("Failed", &format!("{}", red_text.paint("Failed")))
        } else if msg.contains("Skipped") {
            let yellow_text = Style::new().fg(Color::Yellow).bold();
            msg.replace("Skipped", &format!("{}", yellow_text.paint("Skipped")))
        } else {
            match *event.metadata().level() {
                Level::ERROR => Color::LightRed.paint(msg.as_str()).to_string(),
                Level::WARN => Color::Yellow.paint(msg.as_str()).to_string(),
                _ => msg,
            }
        };

        writeln!(writer, "{}", colored_msg)
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = event.metadata().level();

        write!(writer, "{} [{}] {}", timestamp, level, span_prefix(ctx))?;
        writeln!(writer, "{}", message_of(event))
    }
}

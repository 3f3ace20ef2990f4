//! Provides a [`tracing_subscriber::Layer`] ([`ColumnLayer`]) which renders [`tracing`] events,
//! along with the fields of the spans they occur in, through a [`Handler`].

use std::{borrow::Cow, error::Error, fmt};

use tracing::{
    Event, Id, Subscriber,
    field::{Field, Visit},
    span::{Attributes, Record as SpanRecord},
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

use crate::{Attr, Handler, Level, Record, Source, Value, record::Verbatim};

const MESSAGE: &str = "message";

/// A [`tracing_subscriber::Layer`] rendering events through a [`Handler`].
///
/// The fields of each event become the record's attributes. The fields of every span the event
/// occurs in follow, as one group per span named after it, outermost span first. The event's
/// file, line and module path are passed on as the record's call site.
///
/// ```
/// use column_log::{ColumnLayer, Handler, HandlerConfig};
/// use tracing_subscriber::layer::SubscriberExt;
///
/// let subscriber = tracing_subscriber::registry()
///     .with(ColumnLayer::new(Handler::new(HandlerConfig::default())));
/// tracing::subscriber::with_default(subscriber, || {
///     let _span = tracing::info_span!("request", id = 42).entered();
///     tracing::info!(status = 200, "request served");
/// });
/// ```
#[derive(Clone, Debug)]
pub struct ColumnLayer {
    handler: Handler,
}

impl ColumnLayer {
    /// Creates a new [`ColumnLayer`] rendering events through `handler`.
    pub fn new(handler: Handler) -> Self {
        Self { handler }
    }
}

/// Fields recorded for a span or an event.
///
/// Spans keep theirs in their extensions.
#[derive(Debug, Default)]
struct Fields {
    message: Option<String>,
    attrs: Vec<Attr>,
}

impl Fields {
    /// Records a field, replacing the value recorded earlier under the same name.
    fn record_value(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name.starts_with("log.") {
            return;
        }
        let name = name.strip_prefix("r#").unwrap_or(name);

        match self.attrs.iter_mut().find(|attr| attr.key == name) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attr::new(name, value)),
        }
    }

    fn record_message(&mut self, field: &Field, message: impl fmt::Display) -> bool {
        if field.name() != MESSAGE {
            return false;
        }
        if self.message.is_none() {
            self.message = Some(message.to_string());
        }
        true
    }
}

impl Visit for Fields {
    fn record_f64(&mut self, field: &Field, value: f64) {
        if !self.record_message(field, value) {
            self.record_value(field, Value::Float(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if !self.record_message(field, value) {
            self.record_value(field, Value::Int(value));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if !self.record_message(field, value) {
            self.record_value(field, Value::Uint(value));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if !self.record_message(field, value) {
            self.record_value(field, Value::Bool(value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == MESSAGE {
            self.message = Some(value.to_string());
        } else {
            self.record_value(field, Value::from(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if !self.record_message(field, value) {
            self.record_value(field, Value::from_error(value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if !self.record_message(field, format_args!("{value:?}")) {
            self.record_value(field, Value::any(Verbatim(format!("{value:?}"))));
        }
    }
}

impl<S> Layer<S> for ColumnLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        #[allow(clippy::expect_used)]
        let span = ctx
            .span(id)
            .expect("span with specified id does not exist in `on_new_span()`");

        let mut fields = Fields::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &Id, values: &SpanRecord<'_>, ctx: Context<'_, S>) {
        #[allow(clippy::expect_used)]
        let span = ctx
            .span(id)
            .expect("span with specified id does not exist in `on_record()`");
        let mut extensions = span.extensions_mut();

        if let Some(fields) = extensions.get_mut::<Fields>() {
            values.record(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = Level::from(*metadata.level());
        if !self.handler.enabled(level) {
            return;
        }

        let mut fields = Fields::default();
        event.record(&mut fields);

        let mut record =
            Record::now(level, fields.message.unwrap_or_default()).with_attrs(fields.attrs);
        if let Some(file) = metadata.file() {
            record = record.with_source(Source {
                file: Cow::Borrowed(file),
                line: metadata.line().unwrap_or_default(),
                function: metadata.module_path().map(Cow::Borrowed),
            });
        }

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<Fields>() {
                    record.add_attrs([Attr::group(span.name(), fields.attrs.iter().cloned())]);
                }
            }
        }

        let _ = self.handler.handle(record);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex},
    };

    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::{HandlerConfig, SourceFormat};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config() -> HandlerConfig {
        HandlerConfig {
            log_time_format: None,
            ..HandlerConfig::default()
        }
    }

    fn with_layer(config: HandlerConfig, out: &Capture, err: &Capture, f: impl FnOnce()) {
        let handler = Handler::with_outputs(config, out.clone(), err.clone());
        let subscriber = tracing_subscriber::registry().with(ColumnLayer::new(handler));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn events_carry_span_fields_as_groups() {
        let out = Capture::default();
        with_layer(config(), &out, &out, || {
            let _req = tracing::info_span!("req", id = 7, ip = "::1").entered();
            tracing::info!(status = 200, "served");
        });

        assert_eq!(
            out.contents(),
            concat!(
                " [INFO]: served\n",
                " status: 200\n",
                " req.id: 7\n",
                " req.ip: \"::1\"\n",
            )
        );
    }

    #[test]
    fn nested_spans_are_written_outermost_first() {
        let out = Capture::default();
        with_layer(config(), &out, &out, || {
            let _a = tracing::info_span!("a", x = 1).entered();
            let _b = tracing::info_span!("b", y = true).entered();
            tracing::info!("nested");
        });

        assert_eq!(
            out.contents(),
            " [INFO]: nested\n    a.x: 1\n    b.y: true\n"
        );
    }

    #[test]
    fn recorded_span_fields_replace_earlier_values() {
        let out = Capture::default();
        with_layer(config(), &out, &out, || {
            let span = tracing::info_span!("s", a = "x", n = tracing::field::Empty);
            span.record("n", 3);
            span.record("a", "y");
            let _s = span.entered();
            tracing::error!(err = ?vec![1], "failed");
        });

        assert_eq!(
            out.contents(),
            concat!(
                "[ERROR]: failed\n",
                "    err: [1]\n",
                "    s.a: \"y\"\n",
                "    s.n: 3\n",
            )
        );
    }

    #[test]
    fn levels_are_filtered_and_routed() {
        let out = Capture::default();
        let err = Capture::default();
        with_layer(config(), &out, &err, || {
            tracing::trace!("hidden");
            tracing::debug!("hidden");
            tracing::info!("shown");
            tracing::warn!("careful");
        });

        assert_eq!(out.contents(), " [INFO]: shown\n");
        assert_eq!(err.contents(), " [WARN]: careful\n");
    }

    #[test]
    fn events_carry_their_module_path() {
        let out = Capture::default();
        with_layer(
            HandlerConfig {
                source: SourceFormat::Func,
                ..config()
            },
            &out,
            &out,
            || tracing::info!("here"),
        );

        assert_eq!(
            out.contents(),
            " [INFO]: here\n source: \"column_log::layer::tests\"\n"
        );
    }

    #[test]
    fn errors_render_their_display_text() {
        let out = Capture::default();
        with_layer(config(), &out, &out, || {
            let err = io::Error::other("boom");
            tracing::info!(cause = &err as &(dyn Error + 'static), "failed");
        });

        assert_eq!(out.contents(), " [INFO]: failed\n  cause: boom\n");
    }
}

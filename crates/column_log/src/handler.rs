//! Provides the [`Handler`], which renders records as column-aligned text blocks and routes
//! them to an output or error stream depending on their level.

use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    Attr, Level, LoggerError, Record,
    config::HandlerConfig,
    entry::{Entry, GroupPath},
};

type Output = Box<dyn Write + Send>;

/// Streams entries are written to, behind a single lock so that entries never interleave.
struct Outputs {
    out: Output,
    err: Output,
}

/// State shared, read-only apart from the outputs, by a handler and all handlers derived from it.
struct Shared {
    config: HandlerConfig,
    outputs: Mutex<Outputs>,
}

/// A batch of attributes bound with [`Handler::with_attrs`], along with the group path that was
/// in force at that time. Batches form an immutable list, newest first.
#[derive(Debug)]
struct BoundAttrs {
    groups: GroupPath,
    attrs: Vec<Attr>,
    parent: Option<Arc<BoundAttrs>>,
}

/// Renders log records in a human-readable, multi-line format:
///
/// ```text
/// 2006-01-02 15:04:05  [INFO]: message
///                        key: "value"
///                  group.key: 42
/// ```
///
/// Every attribute gets a line of its own, nested groups are flattened into dotted keys, and
/// the keys are right-aligned to a column whose width is given by
/// [`HandlerConfig::key_column`]. Records of level [`Level::WARN`] and above are written to the
/// error stream, everything else to the output stream.
///
/// Handlers are cheap to clone and safe to share between threads. [`Handler::with_attrs`] and
/// [`Handler::with_group`] never modify the handler they are called on, they return a new one
/// sharing its configuration and outputs.
///
/// # Example
///
/// ```
/// use column_log::{Attr, Handler, HandlerConfig, Level, Record};
///
/// let handler = Handler::new(HandlerConfig::default()).with_group("http");
/// handler
///     .handle(
///         Record::now(Level::INFO, "request served")
///             .with_attrs([Attr::string("path", "/"), Attr::uint("status", 200)]),
///     )
///     .expect("failed to write to stdout");
/// ```
#[derive(Clone)]
pub struct Handler {
    shared: Arc<Shared>,
    groups: GroupPath,
    bound: Option<Arc<BoundAttrs>>,
    num_bound: usize,
}

impl Handler {
    /// Creates a handler writing to the standard output and standard error streams.
    pub fn new(config: HandlerConfig) -> Self {
        Self::with_outputs(config, io::stdout(), io::stderr())
    }

    /// Creates a handler writing records below [`Level::WARN`] to `out` and all others to `err`.
    pub fn with_outputs(
        mut config: HandlerConfig,
        out: impl Write + Send + 'static,
        err: impl Write + Send + 'static,
    ) -> Self {
        config.key_column = config.key_column.normalized();
        tracing::debug!("Creating log handler with {config:?}");

        Self {
            groups: GroupPath::default(),
            shared: Arc::new(Shared {
                config,
                outputs: Mutex::new(Outputs {
                    out: Box::new(out),
                    err: Box::new(err),
                }),
            }),
            bound: None,
            num_bound: 0,
        }
    }

    /// Returns `true` if records of the given level are rendered.
    pub fn enabled(&self, level: Level) -> bool {
        self.shared.config.level <= level
    }

    /// Renders the record and writes it to the stream matching its level.
    ///
    /// Attributes are written in this order: the call site (if configured and known), the
    /// record's own attributes nested in this handler's groups, then the attributes bound with
    /// [`Handler::with_attrs`], oldest first.
    ///
    /// The level is not checked here, callers are expected to consult [`Handler::enabled`].
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::WriteEntry`] if writing to the stream fails.
    pub fn handle(&self, record: Record) -> Result<(), LoggerError> {
        let config = &self.shared.config;

        let mut entry = Entry::new(
            &config.time_format,
            config.replace_attr.as_ref(),
            record.num_attrs() + self.num_bound + 1,
        );
        entry.write_header(config.log_time_format.as_ref(), config.key_column, &record);

        if let Some(source) = record
            .source
            .as_ref()
            .and_then(|source| config.source.render(source))
        {
            entry.write_attr(&GroupPath::default(), Attr::string(Attr::SOURCE_KEY, source));
        }

        let level = record.level;
        for attr in record.attrs {
            entry.write_attr(&self.groups, attr);
        }

        let mut batches = Vec::new();
        let mut next = self.bound.as_deref();
        while let Some(batch) = next {
            batches.push(batch);
            next = batch.parent.as_deref();
        }
        for batch in batches.into_iter().rev() {
            for attr in &batch.attrs {
                entry.write_attr(&batch.groups, attr.clone());
            }
        }

        let mut outputs = self
            .shared
            .outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let writer = if level >= Level::WARN {
            &mut outputs.err
        } else {
            &mut outputs.out
        };
        entry
            .write_to(writer.as_mut())
            .map_err(LoggerError::WriteEntry)?;

        Ok(())
    }

    /// Creates a record of the given level at the caller's location, timestamped now, and
    /// handles it if the level is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::WriteEntry`] if writing to the stream fails.
    #[track_caller]
    pub fn log(
        &self,
        level: Level,
        message: impl Into<String>,
        attrs: impl IntoIterator<Item = Attr>,
    ) -> Result<(), LoggerError> {
        if !self.enabled(level) {
            return Ok(());
        }
        self.handle(Record::now(level, message).with_attrs(attrs).with_caller())
    }

    /// Returns a handler which renders the given attributes with every record, after the
    /// record's own attributes.
    ///
    /// Attributes accumulate: those bound by earlier calls are kept. Each batch stays nested in
    /// the groups that were opened when it was bound, groups opened later do not apply to it.
    #[must_use]
    pub fn with_attrs(&self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        let attrs: Vec<Attr> = attrs.into_iter().collect();
        if attrs.is_empty() {
            return self.clone();
        }

        Self {
            shared: Arc::clone(&self.shared),
            groups: self.groups.clone(),
            num_bound: self.num_bound + attrs.len(),
            bound: Some(Arc::new(BoundAttrs {
                groups: self.groups.clone(),
                attrs,
                parent: self.bound.clone(),
            })),
        }
    }

    /// Returns a handler which nests the attributes of every record in the named group.
    ///
    /// An empty name opens no group.
    #[must_use]
    pub fn with_group(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.is_empty() {
            return self.clone();
        }

        Self {
            groups: self.groups.child(name),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("config", &self.shared.config)
            .field("groups", &self.groups)
            .field("num_bound", &self.num_bound)
            .finish_non_exhaustive()
    }
}

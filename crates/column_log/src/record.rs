//! The structured log record consumed by the [`Handler`][crate::Handler]: levels, attribute
//! values (possibly lazy and nested in groups) and call-site references.

use std::{
    borrow::Cow, fmt, mem, ops::Deref, panic::Location, str::FromStr, sync::Arc, time::Duration,
};

use time::OffsetDateTime;

use crate::LoggerError;

/// Number of times a lazy value is asked for its value before giving up.
const MAX_RESOLVE_STEPS: usize = 100;

/// Severity of a log record.
///
/// Levels are ordered integers, so that thresholds can be compared, with well-known values for
/// [`DEBUG`][Self::DEBUG], [`INFO`][Self::INFO], [`WARN`][Self::WARN] and
/// [`ERROR`][Self::ERROR]. Any other value is a valid level too, it is rendered as unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Level(i32);

impl Level {
    /// Debug level.
    pub const DEBUG: Self = Self(-4);

    /// Info level.
    pub const INFO: Self = Self(0);

    /// Warning level.
    pub const WARN: Self = Self(4);

    /// Error level.
    pub const ERROR: Self = Self(8);

    /// Creates a level from its raw integer value.
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw integer value of the level.
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns the level tag as written into the header, always 7 characters wide.
    pub fn tag(self) -> &'static str {
        match self {
            Self::DEBUG => "[DEBUG]",
            Self::INFO => " [INFO]",
            Self::WARN => " [WARN]",
            Self::ERROR => "[ERROR]",
            _ => "[UNKNW]",
        }
    }
}

impl From<i32> for Level {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Self::DEBUG,
            tracing::Level::INFO => Self::INFO,
            tracing::Level::WARN => Self::WARN,
            tracing::Level::ERROR => Self::ERROR,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match *self {
            Self::DEBUG => "DEBUG",
            Self::INFO => "INFO",
            Self::WARN => "WARN",
            Self::ERROR => "ERROR",
            _ => "UNKNW",
        };
        write!(f, "{repr}")
    }
}

impl FromStr for Level {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::DEBUG),
            "info" => Ok(Self::INFO),
            "warn" | "warning" => Ok(Self::WARN),
            "error" => Ok(Self::ERROR),
            other => other.parse::<i32>().map(Self).map_err(|_| {
                LoggerError::Configuration(format!("Unknown log level `{s}`"))
            }),
        }
    }
}

/// A value whose actual contents are computed only when the record is rendered.
///
/// The returned value may itself be lazy, or a group of further (lazy) attributes.
pub trait LogValue: Send + Sync {
    /// Produces the value to be logged.
    fn log_value(&self) -> Value;
}

impl<F> LogValue for F
where
    F: Fn() -> Value + Send + Sync,
{
    fn log_value(&self) -> Value {
        self()
    }
}

/// The kind of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// A string.
    String,

    /// A signed integer.
    Int,

    /// An unsigned integer.
    Uint,

    /// A floating point number.
    Float,

    /// A boolean.
    Bool,

    /// A duration.
    Duration,

    /// A point in time.
    Time,

    /// An ordered sequence of nested attributes.
    Group,

    /// Any other value, rendered with its [`fmt::Debug`] representation.
    Any,

    /// A value that has not been resolved yet.
    Lazy,
}

/// The value of an attribute.
#[derive(Clone)]
pub enum Value {
    /// A string, rendered quoted and escaped.
    String(String),

    /// A signed integer.
    Int(i64),

    /// An unsigned integer.
    Uint(u64),

    /// A floating point number.
    Float(f64),

    /// A boolean.
    Bool(bool),

    /// A duration.
    Duration(Duration),

    /// A point in time, rendered with the handler's attribute time format.
    Time(OffsetDateTime),

    /// A group of attributes, flattened into dotted keys when rendered.
    Group(Group),

    /// Any other value.
    Any(Arc<dyn fmt::Debug + Send + Sync>),

    /// A value resolved on rendering.
    Lazy(Arc<dyn LogValue>),
}

impl Value {
    /// Returns the kind of the value, without resolving it.
    pub fn kind(&self) -> Kind {
        match self {
            Self::String(_) => Kind::String,
            Self::Int(_) => Kind::Int,
            Self::Uint(_) => Kind::Uint,
            Self::Float(_) => Kind::Float,
            Self::Bool(_) => Kind::Bool,
            Self::Duration(_) => Kind::Duration,
            Self::Time(_) => Kind::Time,
            Self::Group(_) => Kind::Group,
            Self::Any(_) => Kind::Any,
            Self::Lazy(_) => Kind::Lazy,
        }
    }

    /// Wraps any debuggable value.
    pub fn any<T>(value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        Self::Any(Arc::new(value))
    }

    /// Wraps a lazily computed value.
    pub fn lazy<T>(value: T) -> Self
    where
        T: LogValue + 'static,
    {
        Self::Lazy(Arc::new(value))
    }

    /// Captures the display text of an error, which is rendered verbatim.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: fmt::Display + ?Sized,
    {
        Self::Any(Arc::new(Verbatim(err.to_string())))
    }

    /// Resolves lazy values until a concrete one is reached.
    ///
    /// Values which keep producing lazy values are cut off after a bounded number of steps and
    /// replaced with an error text, so that a misbehaving value never stalls logging.
    pub fn resolve(self) -> Self {
        let mut value = self;
        for _ in 0..MAX_RESOLVE_STEPS {
            match value {
                Self::Lazy(lazy) => value = lazy.log_value(),
                resolved => return resolved,
            }
        }

        match value {
            Self::Lazy(_) => Self::Any(Arc::new(Verbatim(format!(
                "!ERROR: lazy value unresolved after {MAX_RESOLVE_STEPS} steps"
            )))),
            resolved => resolved,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => f.debug_tuple("String").field(v).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Uint(v) => f.debug_tuple("Uint").field(v).finish(),
            Self::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Duration(v) => f.debug_tuple("Duration").field(v).finish(),
            Self::Time(v) => f.debug_tuple("Time").field(v).finish(),
            Self::Group(v) => f.debug_tuple("Group").field(v).finish(),
            Self::Any(v) => f.debug_tuple("Any").field(v).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// The attributes of a group value, in declaration order.
///
/// The attributes are shared: cloning a group is O(1) however deep it is. Dropping a group
/// releases nested groups in a loop rather than recursively, so trees of any depth are safe to
/// build, clone and drop.
#[derive(Clone)]
pub struct Group(Arc<[Attr]>);

impl Deref for Group {
    type Target = [Attr];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Attr>> for Group {
    fn from(attrs: Vec<Attr>) -> Self {
        Self(attrs.into())
    }
}

impl FromIterator<Attr> for Group {
    fn from_iter<I: IntoIterator<Item = Attr>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        let mut detached = Vec::new();
        detach_nested(&mut self.0, &mut detached);
        while let Some(mut group) = detached.pop() {
            detach_nested(&mut group.0, &mut detached);
        }
    }
}

/// Moves the nested groups out of `attrs` if nothing else shares them.
fn detach_nested(attrs: &mut Arc<[Attr]>, detached: &mut Vec<Group>) {
    let Some(attrs) = Arc::get_mut(attrs) else {
        return;
    };
    for attr in attrs {
        if matches!(attr.value, Value::Group(_)) {
            if let Value::Group(group) = mem::replace(&mut attr.value, Value::Bool(false)) {
                detached.push(group);
            }
        }
    }
}

/// Text that is rendered as-is by its [`fmt::Debug`] implementation.
pub(crate) struct Verbatim(pub(crate) String);

impl fmt::Debug for Verbatim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+
    };
}

impl_value_from! {
    String => String,
    &str => String,
    Cow<'_, str> => String,
    i64 => Int,
    i32 => Int,
    i16 => Int,
    i8 => Int,
    u64 => Uint,
    u32 => Uint,
    u16 => Uint,
    u8 => Uint,
    f64 => Float,
    f32 => Float,
    bool => Bool,
    Duration => Duration,
    OffsetDateTime => Time,
    Vec<Attr> => Group,
}

/// A key-value pair attached to a record.
#[derive(Clone, Debug)]
pub struct Attr {
    /// The key of the attribute.
    pub key: String,

    /// The value of the attribute.
    pub value: Value,
}

impl Attr {
    /// Key of the attribute created by [`Attr::error`].
    pub const ERROR_KEY: &'static str = "error";

    /// Key of the attribute carrying the record's call site.
    pub const SOURCE_KEY: &'static str = "source";

    /// Creates a new attribute.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a string attribute.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Value::String(value.into()))
    }

    /// Creates a signed integer attribute.
    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, Value::Int(value))
    }

    /// Creates an unsigned integer attribute.
    pub fn uint(key: impl Into<String>, value: u64) -> Self {
        Self::new(key, Value::Uint(value))
    }

    /// Creates a floating point attribute.
    pub fn float(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, Value::Float(value))
    }

    /// Creates a boolean attribute.
    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    /// Creates a duration attribute.
    pub fn duration(key: impl Into<String>, value: Duration) -> Self {
        Self::new(key, Value::Duration(value))
    }

    /// Creates a time attribute.
    pub fn time(key: impl Into<String>, value: OffsetDateTime) -> Self {
        Self::new(key, Value::Time(value))
    }

    /// Creates a group of attributes.
    ///
    /// A group with an empty key is inlined into its parent when rendered.
    pub fn group(key: impl Into<String>, attrs: impl IntoIterator<Item = Self>) -> Self {
        Self::new(key, Value::Group(attrs.into_iter().collect()))
    }

    /// Creates an attribute holding any debuggable value.
    pub fn any<T>(key: impl Into<String>, value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        Self::new(key, Value::any(value))
    }

    /// Creates an attribute whose value is computed when the record is rendered.
    pub fn lazy<T>(key: impl Into<String>, value: T) -> Self
    where
        T: LogValue + 'static,
    {
        Self::new(key, Value::lazy(value))
    }

    /// Creates an attribute with the [`ERROR_KEY`][Self::ERROR_KEY] key holding the display text
    /// of `err`.
    pub fn error<E>(err: &E) -> Self
    where
        E: fmt::Display + ?Sized,
    {
        Self::new(Self::ERROR_KEY, Value::from_error(err))
    }
}

/// The place in the code a record was emitted from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Source {
    /// Path of the source file.
    pub file: Cow<'static, str>,

    /// Line number in the source file.
    pub line: u32,

    /// Fully qualified path of the function or module, if known.
    pub function: Option<Cow<'static, str>>,
}

impl Source {
    /// Returns the location of the caller.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: Cow::Borrowed(location.file()),
            line: location.line(),
            function: None,
        }
    }
}

/// A single structured log event.
#[derive(Clone, Debug)]
pub struct Record {
    /// When the event happened.
    pub time: OffsetDateTime,

    /// Severity of the event.
    pub level: Level,

    /// The log message.
    pub message: String,

    /// Attributes attached to the event, in declaration order.
    pub attrs: Vec<Attr>,

    /// Call site of the event.
    pub source: Option<Source>,
}

impl Record {
    /// Creates a record without attributes.
    pub fn new(time: OffsetDateTime, level: Level, message: impl Into<String>) -> Self {
        Self {
            time,
            level,
            message: message.into(),
            attrs: Vec::new(),
            source: None,
        }
    }

    /// Creates a record timestamped with the current local time, falling back to UTC if the
    /// local offset cannot be determined.
    pub fn now(level: Level, message: impl Into<String>) -> Self {
        let time = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self::new(time, level, message)
    }

    /// Appends attributes to the record.
    #[must_use]
    pub fn with_attrs(mut self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        self.add_attrs(attrs);
        self
    }

    /// Appends attributes to the record in place.
    pub fn add_attrs(&mut self, attrs: impl IntoIterator<Item = Attr>) {
        self.attrs.extend(attrs);
    }

    /// Sets the call site of the record.
    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the call site of the record to the location of the caller.
    #[must_use]
    #[track_caller]
    pub fn with_caller(self) -> Self {
        self.with_source(Source::caller())
    }

    /// Returns the number of attributes attached to the record itself.
    pub fn num_attrs(&self) -> usize {
        self.attrs.len()
    }
}

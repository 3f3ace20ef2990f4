//! Configuration of a [`Handler`][crate::Handler]: level threshold, key column policy, time
//! formats, source location rendering and the attribute replacement hook.

use std::{fmt, str::FromStr, sync::Arc};

use time::{
    OffsetDateTime,
    format_description::{
        BorrowedFormatItem, OwnedFormatItem,
        well_known::{Iso8601, Rfc2822, Rfc3339},
    },
    macros::format_description,
};

use crate::{Attr, Level, LoggerError, Source};

/// Width of the bracketed level tag, e.g. `[DEBUG]`, and thus the narrowest possible key column.
pub const LEVEL_TAG_WIDTH: usize = 7;

/// Format description of the default header timestamp, e.g. `2006-01-02 15:04:05`.
pub const DEFAULT_LOG_TIME_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second]";

const DEFAULT_LOG_TIME_ITEMS: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// A hook applied to every attribute before it is rendered.
///
/// It receives the group path of the attribute and the attribute itself, and may return it
/// unchanged, return a different attribute, or return `None` to drop the attribute altogether.
/// Group attributes pass through the hook before they are expanded, and their children pass
/// through it afterwards.
pub type ReplaceAttr = Arc<dyn Fn(&[String], Attr) -> Option<Attr> + Send + Sync>;

/// How timestamps are formatted.
#[derive(Clone, Debug, Default)]
pub enum TimeFormat {
    /// [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339), e.g. `2006-01-02T15:04:05Z`.
    #[default]
    Rfc3339,

    /// [RFC 2822](https://datatracker.ietf.org/doc/html/rfc2822),
    /// e.g. `Mon, 02 Jan 2006 15:04:05 +0000`.
    Rfc2822,

    /// ISO 8601 with the `time` crate's default configuration.
    Iso8601,

    /// A format description known at compile time, see [`time::macros::format_description`].
    Static(&'static [BorrowedFormatItem<'static>]),

    /// A format description parsed at runtime.
    Custom(OwnedFormatItem),
}

impl TimeFormat {
    /// Parses a [format description](https://time-rs.github.io/book/api/format-description.html),
    /// or one of the names `rfc3339`, `rfc2822` and `iso8601`.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::InvalidTimeFormat`] if `description` is not a valid format
    /// description.
    pub fn parse(description: &str) -> Result<Self, LoggerError> {
        match description.to_ascii_lowercase().as_str() {
            "rfc3339" => Ok(Self::Rfc3339),
            "rfc2822" => Ok(Self::Rfc2822),
            "iso8601" => Ok(Self::Iso8601),
            _ => Ok(Self::Custom(time::format_description::parse_owned::<2>(
                description,
            )?)),
        }
    }

    /// Formats `time`, falling back to its [`fmt::Display`] representation if the format cannot
    /// represent it.
    pub fn format(&self, time: OffsetDateTime) -> String {
        let formatted = match self {
            Self::Rfc3339 => time.format(&Rfc3339),
            Self::Rfc2822 => time.format(&Rfc2822),
            Self::Iso8601 => time.format(&Iso8601::DEFAULT),
            Self::Static(items) => time.format(*items),
            Self::Custom(items) => time.format(items),
        };
        formatted.unwrap_or_else(|_| time.to_string())
    }
}

impl FromStr for TimeFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Width of the column the attribute keys are right-aligned to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyColumn {
    /// The column is as wide as the header (timestamp and level tag) of each entry.
    #[default]
    Header,

    /// The header is never padded nor truncated, so each entry is aligned to its own header.
    Unbounded,

    /// The column is exactly this many characters wide. The header timestamp is padded or
    /// truncated to fit. Widths below [`LEVEL_TAG_WIDTH`] are treated as
    /// [`Unbounded`][Self::Unbounded].
    Fixed(usize),
}

impl KeyColumn {
    /// Maps the raw key size setting: `0` is [`Header`][Self::Header], `-1` is
    /// [`Unbounded`][Self::Unbounded] and anything from [`LEVEL_TAG_WIDTH`] up is a
    /// [`Fixed`][Self::Fixed] width. Any other value is coerced to
    /// [`Unbounded`][Self::Unbounded].
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => Self::Header,
            -1 => Self::Unbounded,
            width => match usize::try_from(width) {
                Ok(width) if width >= LEVEL_TAG_WIDTH => Self::Fixed(width),
                _ => {
                    tracing::warn!(
                        "Key size `{raw}` is out of range, falling back to an unbounded key column"
                    );
                    Self::Unbounded
                }
            },
        }
    }

    /// Returns a fixed-width column, or an unbounded one if `width` is too narrow to fit the
    /// level tag.
    pub fn fixed(width: usize) -> Self {
        if width >= LEVEL_TAG_WIDTH {
            Self::Fixed(width)
        } else {
            Self::Unbounded
        }
    }

    pub(crate) fn normalized(self) -> Self {
        match self {
            Self::Fixed(width) => Self::fixed(width),
            other => other,
        }
    }
}

/// How the call site of a record is rendered, as the `source` attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum SourceFormat {
    /// The call site is not rendered.
    #[default]
    None,

    /// File name and line, e.g. `handler.rs:42`.
    Pos,

    /// Fully qualified function (or module) path, e.g. `my_app::server::handle`.
    Func,

    /// Full file path, line and the last two segments of the function path, e.g.
    /// `/src/my_app/src/server.rs:42:server::handle`.
    Long,
}

impl SourceFormat {
    /// Renders the call site according to the format, `None` if there is nothing to render.
    pub fn render(self, source: &Source) -> Option<String> {
        match self {
            Self::None => None,
            Self::Pos => {
                let file = source
                    .file
                    .rsplit(['/', '\\'])
                    .next()
                    .unwrap_or(&source.file);
                Some(format!("{file}:{}", source.line))
            }
            Self::Func => source.function.as_ref().map(ToString::to_string),
            Self::Long => Some(match &source.function {
                Some(function) => format!(
                    "{}:{}:{}",
                    source.file,
                    source.line,
                    short_function(function)
                ),
                None => format!("{}:{}", source.file, source.line),
            }),
        }
    }
}

/// Keeps the last two `::`-separated segments of a path.
fn short_function(path: &str) -> &str {
    path.rmatch_indices("::")
        .nth(1)
        .and_then(|(i, _)| path.get(i + 2..))
        .unwrap_or(path)
}

/// Configuration of a [`Handler`][crate::Handler].
#[derive(Clone)]
pub struct HandlerConfig {
    /// Minimum level of the records to be rendered.
    pub level: Level,

    /// Width of the key column.
    pub key_column: KeyColumn,

    /// Format of time attribute values.
    pub time_format: TimeFormat,

    /// Format of the header timestamp. If `None`, the header carries no timestamp.
    pub log_time_format: Option<TimeFormat>,

    /// How the call site of a record is rendered.
    pub source: SourceFormat,

    /// Hook applied to every attribute before rendering. If `None`, attributes are rendered
    /// unchanged.
    pub replace_attr: Option<ReplaceAttr>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            key_column: KeyColumn::Header,
            time_format: TimeFormat::Rfc3339,
            log_time_format: Some(TimeFormat::Static(DEFAULT_LOG_TIME_ITEMS)),
            source: SourceFormat::None,
            replace_attr: None,
        }
    }
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("level", &self.level)
            .field("key_column", &self.key_column)
            .field("time_format", &self.time_format)
            .field("log_time_format", &self.log_time_format)
            .field("source", &self.source)
            .field("replace_attr", &self.replace_attr.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Raw, string and integer typed handler settings, as found in configuration files.
///
/// Convert them into a [`HandlerConfig`] with [`TryFrom`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct HandlerSettings {
    /// Minimum level, either a name (`debug`, `info`, `warn`, `error`) or an integer.
    pub level: String,

    /// Key column width: `0` derives it from the header, `-1` leaves it unbounded, `7` or more
    /// fixes it. Other values are treated as unbounded.
    pub max_key_size: i64,

    /// Format of time attribute values, see [`TimeFormat::parse`].
    pub time_format: String,

    /// Format of the header timestamp, see [`TimeFormat::parse`]. Empty disables the timestamp.
    pub log_time_format: String,

    /// How the call site of a record is rendered.
    pub source: SourceFormat,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_key_size: 0,
            time_format: "rfc3339".to_string(),
            log_time_format: DEFAULT_LOG_TIME_FORMAT.to_string(),
            source: SourceFormat::None,
        }
    }
}

impl TryFrom<HandlerSettings> for HandlerConfig {
    type Error = LoggerError;

    fn try_from(settings: HandlerSettings) -> Result<Self, Self::Error> {
        let log_time_format = if settings.log_time_format.is_empty() {
            None
        } else {
            Some(settings.log_time_format.parse()?)
        };

        Ok(Self {
            level: settings.level.parse()?,
            key_column: KeyColumn::from_raw(settings.max_key_size),
            time_format: settings.time_format.parse()?,
            log_time_format,
            source: settings.source,
            replace_attr: None,
        })
    }
}

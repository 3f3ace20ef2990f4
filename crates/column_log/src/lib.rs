//! `column_log` renders structured log records as human-readable, multi-line text blocks with
//! the attribute keys right-aligned into a single column:
//!
//! ```text
//! 2006-01-02 15:04:05  [INFO]: request served
//!                        path: "/health"
//!               http.status: 200
//! ```
//!
//! It offers:
//! - A [`Handler`] which renders [`Record`]s according to a [`HandlerConfig`] and routes them to
//!   an output or error stream depending on their [`Level`].
//! - [`HandlerSettings`] for loading the configuration from raw, string typed settings,
//!   deserializable with the `serde` feature.
//! - With the `layer` feature, a [`ColumnLayer`] which renders [`tracing`] events and their
//!   span fields through a [`Handler`].
//!
//! The building blocks used for rendering, a bounded FIFO [`Queue`] and a newline-tracking
//! [`LineBuffer`], are exposed as well.

mod buffer;
mod config;
mod entry;
mod handler;
#[cfg(feature = "layer")]
mod layer;
mod queue;
mod record;

#[cfg(feature = "layer")]
pub use self::layer::ColumnLayer;
pub use self::{
    buffer::LineBuffer,
    config::{
        DEFAULT_LOG_TIME_FORMAT, HandlerConfig, HandlerSettings, KeyColumn, LEVEL_TAG_WIDTH,
        ReplaceAttr, SourceFormat, TimeFormat,
    },
    handler::Handler,
    queue::Queue,
    record::{Attr, Group, Kind, Level, LogValue, Record, Source, Value},
};

/// Errors that can occur within the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Represents an error in configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Represents an invalid time format description.
    #[error("Invalid time format description: {0}")]
    InvalidTimeFormat(#[from] time::error::InvalidFormatDescription),

    /// Represents an attempt to overwrite a [`LineBuffer`] past its end.
    #[error("Offset {offset} is out of bounds for a buffer of length {len}")]
    InvalidOffset {
        /// The offset written at.
        offset: usize,

        /// The length of the buffer.
        len: usize,
    },

    /// Represents a failure to write a rendered entry to its destination.
    #[error("write entry to the writer: {0}")]
    WriteEntry(#[source] std::io::Error),
}

//! Rendering of a single record into a header line followed by one line per attribute, with
//! the attribute keys right-aligned to the width of the header.

use std::{cmp::Ordering, fmt, fmt::Write as _, io, iter, sync::Arc};

use crate::{
    Attr, LineBuffer, Record, Value,
    config::{KeyColumn, LEVEL_TAG_WIDTH, ReplaceAttr, TimeFormat},
    queue::Queue,
};

/// Marks text truncated from the left.
const ELLIPSIS: &str = "...";

/// Written in place of a value whose [`fmt::Debug`] implementation failed.
const BAD_FORMAT: &str = "!BADFMT";

/// Names of the groups an attribute is nested in.
///
/// A persistent list linked from the innermost group outwards, so that opening a group is O(1)
/// and shares the enclosing path.
#[derive(Clone, Default)]
pub(crate) struct GroupPath(Option<Arc<PathNode>>);

struct PathNode {
    name: String,
    parent: GroupPath,
}

impl GroupPath {
    /// Returns the path extended by the group `name`.
    pub(crate) fn child(&self, name: String) -> Self {
        Self(Some(Arc::new(PathNode {
            name,
            parent: self.clone(),
        })))
    }

    /// Returns the group names, innermost first.
    fn names(&self) -> impl Iterator<Item = &str> + '_ {
        iter::successors(self.0.as_deref(), |&node| node.parent.0.as_deref())
            .map(|node| node.name.as_str())
    }

    /// Returns the group names, outermost first.
    pub(crate) fn to_vec(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names().map(str::to_owned).collect();
        names.reverse();
        names
    }
}

impl fmt::Debug for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

impl Drop for GroupPath {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(node) = next {
            next = Arc::into_inner(node).and_then(|mut node| node.parent.0.take());
        }
    }
}

/// An attribute waiting to be rendered, along with the groups it is nested in.
#[derive(Debug)]
struct Grouped {
    groups: GroupPath,
    attr: Attr,
}

/// The rendered text block of a single record.
///
/// Nested groups are flattened with a work queue rather than recursion: expanding a group
/// pushes its children behind everything already queued, so arbitrarily deep (or lazily
/// produced) trees never grow the call stack.
pub(crate) struct Entry<'a> {
    time_format: &'a TimeFormat,
    replace_attr: Option<&'a ReplaceAttr>,

    header_len: usize,
    key: String,
    buf: LineBuffer,
    queue: Queue<Grouped>,
}

impl<'a> Entry<'a> {
    /// Creates an entry sized for `num_attrs` attributes.
    pub(crate) fn new(
        time_format: &'a TimeFormat,
        replace_attr: Option<&'a ReplaceAttr>,
        num_attrs: usize,
    ) -> Self {
        Self {
            time_format,
            replace_attr,
            header_len: 0,
            key: String::new(),
            buf: LineBuffer::with_capacity(num_attrs + 1),
            queue: Queue::with_capacity(num_attrs),
        }
    }

    /// Writes the `<timestamp> [LEVEL]: <message>` line.
    ///
    /// Everything before the `": "` separator makes up the key column of the entry.
    pub(crate) fn write_header(
        &mut self,
        log_time_format: Option<&TimeFormat>,
        key_column: KeyColumn,
        record: &Record,
    ) {
        if let Some(format) = log_time_format {
            let timestamp = format.format(record.time);
            match key_column {
                KeyColumn::Header | KeyColumn::Unbounded => self.buf.write_str(&timestamp),
                KeyColumn::Fixed(width) => write_fitted(
                    &mut self.buf,
                    &timestamp,
                    width.saturating_sub(LEVEL_TAG_WIDTH),
                ),
            }
            self.buf.write_str(" ");
        }

        self.buf.write_str(record.level.tag());
        self.header_len = self.buf.len();

        self.buf.write_str(": ");
        self.buf.write_str(&record.message);
        self.buf.write_str("\n");
    }

    /// Writes an attribute nested in `groups`, one line per leaf value.
    ///
    /// Group values are not written themselves, their children are queued up instead, with the
    /// group's key appended to their group path.
    pub(crate) fn write_attr(&mut self, groups: &GroupPath, attr: Attr) {
        self.queue.push_back(Grouped {
            groups: groups.clone(),
            attr,
        });

        while !self.queue.is_empty() {
            let Grouped { groups, attr } = self.queue.pop_front();

            let attr = match self.replace_attr {
                Some(replace_attr) => match replace_attr(groups.to_vec().as_slice(), attr) {
                    Some(attr) => attr,
                    None => continue,
                },
                None => attr,
            };

            let Attr { key, value } = attr;
            match value.resolve() {
                Value::Group(children) => {
                    // groups without a key are inlined into their parent
                    let groups = if key.is_empty() {
                        groups
                    } else {
                        groups.child(key)
                    };

                    for child in children.iter() {
                        self.queue.push_back(Grouped {
                            groups: groups.clone(),
                            attr: child.clone(),
                        });
                    }
                }
                value => {
                    self.write_key(&groups, &key);
                    self.buf.write_str(": ");
                    self.write_text_value(&value);
                    self.buf.write_str("\n");
                }
            }
        }
    }

    /// Writes the dotted key right-aligned to the header, truncating it from the left if it
    /// does not fit.
    fn write_key(&mut self, groups: &GroupPath, key: &str) {
        let names: Vec<&str> = groups.names().collect();
        self.key.clear();
        for name in names.iter().rev() {
            self.key.push_str(name);
            self.key.push('.');
        }
        self.key.push_str(key);

        self.buf.grow(self.header_len);
        write_fitted(&mut self.buf, &self.key, self.header_len);
    }

    /// Writes a resolved, non-group value.
    ///
    /// A value whose [`fmt::Debug`] implementation fails is replaced with `!BADFMT`.
    ///
    /// # Panics
    ///
    /// Panics if `value` is a group or lazy, [`Entry::write_attr`] must have resolved and
    /// expanded it.
    #[allow(clippy::panic, reason = "an unexpanded value reaching this point is a bug in the entry")]
    fn write_text_value(&mut self, value: &Value) {
        let start = self.buf.len();
        let written = match value {
            Value::String(v) => write!(self.buf, "{v:?}"),
            Value::Int(v) => write!(self.buf, "{v}"),
            Value::Uint(v) => write!(self.buf, "{v}"),
            Value::Float(v) => write!(self.buf, "{v}"),
            Value::Bool(v) => write!(self.buf, "{v}"),
            Value::Duration(v) => write!(self.buf, "{v:?}"),
            Value::Time(v) => {
                self.buf.write_str(&self.time_format.format(*v));
                Ok(())
            }
            Value::Any(v) => write!(self.buf, "{v:?}"),
            Value::Group(_) | Value::Lazy(_) => {
                panic!("values must be resolved and expanded before they are written as text")
            }
        };

        if written.is_err() {
            self.buf.truncate(start);
            self.buf.write_str(BAD_FORMAT);
        }
    }

    /// Writes the rendered entry to `writer` in a single call, returning the number of bytes
    /// written.
    pub(crate) fn write_to<W>(&self, writer: &mut W) -> io::Result<usize>
    where
        W: io::Write + ?Sized,
    {
        writer.write_all(self.buf.as_bytes())?;
        Ok(self.buf.len())
    }

    #[cfg(test)]
    pub(crate) fn as_str(&self) -> std::borrow::Cow<'_, str> {
        self.buf.as_str()
    }
}

/// Writes `text` right-aligned into exactly `width` bytes: padded with spaces on the left if it
/// is shorter, or reduced to `...` followed by its rightmost bytes if it is longer.
fn write_fitted(buf: &mut LineBuffer, text: &str, width: usize) {
    match text.len().cmp(&width) {
        Ordering::Less => {
            buf.write_repeated(b' ', width - text.len());
            buf.write_str(text);
        }
        Ordering::Equal => buf.write_str(text),
        Ordering::Greater => {
            let ellipsis = ELLIPSIS.get(..width.min(ELLIPSIS.len())).unwrap_or_default();
            let visible = tail(text, width - ellipsis.len());
            buf.write_str(ellipsis);
            // non-ASCII text may have lost a partial character at the cut
            buf.write_repeated(b' ', width - ellipsis.len() - visible.len());
            buf.write_str(visible);
        }
    }
}

/// Returns at most the last `n` bytes of `s`, cut at a character boundary.
fn tail(s: &str, n: usize) -> &str {
    let mut start = s.len().saturating_sub(n);
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s.get(start..).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use time::macros::{datetime, format_description};

    use super::*;
    use crate::Level;

    const HEADER_TIME: TimeFormat =
        TimeFormat::Static(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"));

    fn record(level: Level, attrs: impl IntoIterator<Item = Attr>) -> Record {
        Record::new(datetime!(2006-01-02 15:04:05 UTC), level, "msg").with_attrs(attrs)
    }

    fn render_with(
        log_time_format: Option<&TimeFormat>,
        key_column: KeyColumn,
        replace_attr: Option<&ReplaceAttr>,
        record: Record,
    ) -> String {
        let time_format = TimeFormat::Rfc3339;
        let mut entry = Entry::new(&time_format, replace_attr, record.num_attrs());
        entry.write_header(log_time_format, key_column, &record);
        let groups = GroupPath::default();
        for attr in record.attrs {
            entry.write_attr(&groups, attr);
        }
        entry.as_str().into_owned()
    }

    fn render(record: Record) -> String {
        render_with(None, KeyColumn::Header, None, record)
    }

    /// Returns the keys of the attribute lines, without padding.
    fn keys(rendered: &str) -> Vec<&str> {
        rendered
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(": ").map(|(key, _)| key.trim_start()))
            .collect()
    }

    #[test]
    fn flattens_groups_after_their_siblings() {
        let rendered = render(record(
            Level::INFO,
            [
                Attr::int("a", 1),
                Attr::int("b", 2),
                Attr::group(
                    "G",
                    [
                        Attr::int("c", 3),
                        Attr::int("d", 4),
                        Attr::group("H", [Attr::int("e", 5)]),
                    ],
                ),
            ],
        ));
        assert_eq!(keys(&rendered), ["a", "b", "G.c", "G.d", "G.H.e"]);

        let rendered = render_with(
            None,
            KeyColumn::Unbounded,
            None,
            record(
                Level::INFO,
                [Attr::group(
                    "G",
                    [
                        Attr::group("H", [Attr::int("e", 5)]),
                        Attr::int("c", 3),
                    ],
                )],
            ),
        );
        assert_eq!(keys(&rendered), ["G.c", "G.H.e"]);
    }

    #[test]
    fn header_without_timestamp() {
        let rendered = render(record(Level::WARN, []));
        assert_eq!(rendered, " [WARN]: msg\n");
    }

    #[test]
    fn header_derived_width() {
        let rendered = render_with(
            Some(&HEADER_TIME),
            KeyColumn::Header,
            None,
            record(Level::ERROR, [Attr::int("int", 1)]),
        );
        assert_eq!(
            rendered,
            "2006-01-02 15:04:05 [ERROR]: msg\n                        int: 1\n"
        );
    }

    #[test]
    fn fixed_width_pads_short_timestamps() {
        let rendered = render_with(
            Some(&HEADER_TIME),
            KeyColumn::Fixed(30),
            None,
            record(Level::INFO, []),
        );
        assert_eq!(rendered, "    2006-01-02 15:04:05  [INFO]: msg\n");
    }

    #[test]
    fn fixed_width_truncates_long_timestamps() {
        let rendered = render_with(
            Some(&HEADER_TIME),
            KeyColumn::Fixed(17),
            None,
            record(Level::INFO, []),
        );
        assert_eq!(rendered, "...5:04:05  [INFO]: msg\n");

        let rendered = render_with(
            Some(&HEADER_TIME),
            KeyColumn::Fixed(26),
            None,
            record(Level::INFO, []),
        );
        assert_eq!(rendered, "2006-01-02 15:04:05  [INFO]: msg\n");
    }

    #[test]
    fn key_separator_lines_up_for_fixed_widths() {
        for width in [7, 8, 10, 26, 40] {
            let rendered = render_with(
                Some(&HEADER_TIME),
                KeyColumn::Fixed(width),
                None,
                record(
                    Level::DEBUG,
                    [
                        Attr::int("k", 1),
                        Attr::int("a_very_long_key_that_never_fits_anywhere", 2),
                        Attr::group("g", [Attr::int("k", 3)]),
                    ],
                ),
            );
            for line in rendered.lines() {
                assert_eq!(line.find(": "), Some(width + 1), "{line:?} (width {width})");
            }
        }
    }

    #[test]
    fn truncation_boundary_at_minimum_width() {
        let rendered = render_with(
            None,
            KeyColumn::Fixed(7),
            None,
            record(
                Level::DEBUG,
                [Attr::int("abcdefg", 1), Attr::int("abcdefgh", 2)],
            ),
        );
        assert_eq!(rendered, "[DEBUG]: msg\nabcdefg: 1\n...efgh: 2\n");
    }

    #[test]
    fn truncation_boundary_with_timestamp() {
        for (width, exact, longer, truncated) in [
            (7, "abcdefgh", "abcdefghi", "...efghi"),
            (10, "abcdefghijk", "abcdefghijkl", "...efghijkl"),
        ] {
            let rendered = render_with(
                Some(&HEADER_TIME),
                KeyColumn::Fixed(width),
                None,
                record(Level::INFO, [Attr::int(exact, 1), Attr::int(longer, 2)]),
            );
            let mut lines = rendered.lines().skip(1);
            assert_eq!(lines.next().unwrap(), format!("{exact}: 1"));
            assert_eq!(lines.next().unwrap(), format!("{truncated}: 2"));
        }
    }

    #[test]
    fn value_rendering() {
        let rendered = render_with(
            None,
            KeyColumn::Unbounded,
            None,
            record(
                Level::INFO,
                [
                    Attr::string("s", "line1\n\"quoted\""),
                    Attr::float("f", 1.5),
                    Attr::uint("u", 7),
                    Attr::bool("b", false),
                    Attr::duration("d", Duration::from_millis(1500)),
                    Attr::time("t", datetime!(2024-01-02 03:04:05 UTC)),
                    Attr::any("v", vec![1, 2]),
                ],
            ),
        );
        assert_eq!(
            rendered,
            concat!(
                " [INFO]: msg\n",
                "      s: \"line1\\n\\\"quoted\\\"\"\n",
                "      f: 1.5\n",
                "      u: 7\n",
                "      b: false\n",
                "      d: 1.5s\n",
                "      t: 2024-01-02T03:04:05Z\n",
                "      v: [1, 2]\n",
            )
        );
    }

    #[test]
    fn lazy_values_expand_into_groups() {
        let rendered = render(record(
            Level::INFO,
            [Attr::lazy("req", || {
                Value::from(vec![
                    Attr::string("id", "42"),
                    Attr::lazy("ms", || Value::Int(3)),
                ])
            })],
        ));
        assert_eq!(rendered, " [INFO]: msg\n req.id: \"42\"\n req.ms: 3\n");
    }

    #[test]
    fn empty_key_groups_are_inlined() {
        let rendered = render(record(
            Level::INFO,
            [
                Attr::group("", [Attr::int("a", 1)]),
                Attr::group("empty", []),
                Attr::int("b", 2),
            ],
        ));
        assert_eq!(rendered, " [INFO]: msg\n      a: 1\n      b: 2\n");
    }

    #[test]
    fn replace_attr_renames_drops_and_sees_groups() {
        let replace: ReplaceAttr = Arc::new(|groups: &[String], attr: Attr| {
            if attr.key == "secret" {
                None
            } else if attr.key == "int" && groups.is_empty() {
                Some(Attr::int("int", 2))
            } else if attr.key == "g" {
                Some(Attr::group("h", [Attr::int("x", 9)]))
            } else {
                Some(attr)
            }
        });

        let rendered = render_with(
            None,
            KeyColumn::Header,
            Some(&replace),
            record(
                Level::INFO,
                [
                    Attr::int("int", 1),
                    Attr::string("secret", "hunter2"),
                    Attr::group("g", [Attr::int("int", 1)]),
                    Attr::group("k", [Attr::int("int", 1), Attr::string("secret", "x")]),
                ],
            ),
        );
        assert_eq!(
            rendered,
            " [INFO]: msg\n    int: 2\n    h.x: 9\n  k.int: 1\n"
        );
    }

    #[test]
    fn write_to_reports_bytes_written() {
        let time_format = TimeFormat::Rfc3339;
        let mut entry = Entry::new(&time_format, None, 0);
        entry.write_header(None, KeyColumn::Header, &record(Level::INFO, []));

        let mut out = Vec::new();
        assert_eq!(entry.write_to(&mut out).unwrap(), 13);
        assert_eq!(out, b" [INFO]: msg\n");
    }

    #[test]
    #[should_panic(expected = "values must be resolved and expanded")]
    fn group_values_cannot_be_written_as_text() {
        let time_format = TimeFormat::Rfc3339;
        let mut entry = Entry::new(&time_format, None, 0);
        entry.write_text_value(&Value::from(Vec::<Attr>::new()));
    }

    #[test]
    #[should_panic(expected = "values must be resolved and expanded")]
    fn lazy_values_cannot_be_written_as_text() {
        let time_format = TimeFormat::Rfc3339;
        let mut entry = Entry::new(&time_format, None, 0);
        entry.write_text_value(&Value::lazy(|| Value::Int(1)));
    }

    #[test]
    fn failing_debug_impls_render_a_marker() {
        struct Unprintable;

        impl fmt::Debug for Unprintable {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("half\nwritten")?;
                Err(fmt::Error)
            }
        }

        let time_format = TimeFormat::Rfc3339;
        let record = record(
            Level::INFO,
            [Attr::any("v", Unprintable), Attr::int("n", 1)],
        );
        let mut entry = Entry::new(&time_format, None, record.num_attrs());
        entry.write_header(None, KeyColumn::Header, &record);
        for attr in record.attrs {
            entry.write_attr(&GroupPath::default(), attr);
        }

        assert_eq!(entry.as_str(), " [INFO]: msg\n      v: !BADFMT\n      n: 1\n");
        assert_eq!(entry.buf.newlines(), &[12, 29, 40]);
    }

    #[test]
    fn deeply_nested_groups_do_not_overflow() {
        const DEPTH: usize = 100_000;

        let mut attr = Attr::int("leaf", 1);
        for _ in 0..DEPTH {
            attr = Attr::group("g", [attr]);
        }
        let key = format!("{}leaf", "g.".repeat(DEPTH));

        let rendered = render_with(
            Some(&HEADER_TIME),
            KeyColumn::Fixed(key.len()),
            None,
            record(Level::INFO, [attr]),
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], format!(" {key}: 1"));
    }

    #[test]
    fn group_paths_share_their_parents() {
        let root = GroupPath::default();
        let a = root.child("a".to_string());
        let ab = a.child("b".to_string());
        let ac = a.child("c".to_string());
        drop(a);

        assert!(root.to_vec().is_empty());
        assert_eq!(ab.to_vec(), ["a", "b"]);
        assert_eq!(ac.to_vec(), ["a", "c"]);
        assert_eq!(format!("{ab:?}"), r#"["a", "b"]"#);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aé", 2), "é");
    }
}

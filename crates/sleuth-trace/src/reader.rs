//! Event-log ingestion: a JSON Lines reader and the window chunker.
//!
//! The chunker is the single place where the global-order obligation of the
//! log is enforced; every source of events, file-backed or programmatic, is
//! funnelled through [`Windows`] before it reaches the trace builder.

use std::io::BufRead;

use miette::Diagnostic;
use thiserror::Error;

use crate::event::Event;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("event {gid} follows event {previous}: global ids must strictly increase")]
    #[diagnostic(
        code(sleuth::ingest::non_monotonic),
        help("the log was truncated, merged or reordered after recording")
    )]
    NonMonotonic { previous: u64, gid: u64 },

    #[error("malformed event on line {line}: {message}")]
    #[diagnostic(code(sleuth::ingest::malformed))]
    Malformed { line: usize, message: String },

    #[error("failed to read event log: {0}")]
    #[diagnostic(code(sleuth::ingest::io))]
    Io(#[from] std::io::Error),
}

/// Reads one JSON-encoded [`Event`] per line, skipping blank lines.
pub struct JsonLinesReader<R> {
    input: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buf: String::new(),
        }
    }
}

#[cfg(feature = "serialize")]
impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = Result<Event, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.input.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(IngestError::Io(e))),
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str::<Event>(text).map_err(|e| IngestError::Malformed {
                    line: self.line,
                    message: e.to_string(),
                }),
            );
        }
    }
}

/// Splits an event stream into consecutive windows of at most `size` events.
///
/// Yields an error (and then stops) as soon as the stream fails or a global
/// id does not exceed its predecessor.
pub struct Windows<I> {
    events: I,
    size: usize,
    last_gid: Option<u64>,
    done: bool,
}

impl<I> Windows<I>
where
    I: Iterator<Item = Result<Event, IngestError>>,
{
    pub fn new(events: I, size: usize) -> Self {
        Self {
            events,
            size: size.max(1),
            last_gid: None,
            done: false,
        }
    }
}

impl<I> Iterator for Windows<I>
where
    I: Iterator<Item = Result<Event, IngestError>>,
{
    type Item = Result<Vec<Event>, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut window = Vec::with_capacity(self.size);
        while window.len() < self.size {
            match self.events.next() {
                None => {
                    self.done = true;
                    break;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(event)) => {
                    if let Some(previous) = self.last_gid {
                        if event.gid <= previous {
                            self.done = true;
                            return Some(Err(IngestError::NonMonotonic {
                                previous,
                                gid: event.gid,
                            }));
                        }
                    }
                    self.last_gid = Some(event.gid);
                    window.push(event);
                }
            }
        }
        if window.is_empty() {
            None
        } else {
            Some(Ok(window))
        }
    }
}

/// Chunk already-materialized events, see [`Windows`].
pub fn windows_of(
    events: Vec<Event>,
    size: usize,
) -> Windows<impl Iterator<Item = Result<Event, IngestError>>> {
    Windows::new(events.into_iter().map(Ok), size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, LocationId, ThreadId};

    fn branch(gid: u64) -> Event {
        Event::new(gid, ThreadId(1), LocationId(1), EventKind::Branch)
    }

    #[test]
    fn chunks_preserve_order_and_sizes() {
        let events: Vec<Event> = (1..=5).map(branch).collect();
        let windows: Vec<Vec<Event>> = windows_of(events, 2)
            .collect::<Result<_, _>>()
            .expect("monotonic stream");
        let sizes: Vec<usize> = windows.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(windows[2][0].gid, 5);
    }

    #[test]
    fn non_monotonic_gid_is_fatal() {
        let events = vec![branch(1), branch(3), branch(3), branch(4)];
        let mut windows = windows_of(events, 10);
        match windows.next() {
            Some(Err(IngestError::NonMonotonic { previous, gid })) => {
                assert_eq!((previous, gid), (3, 3));
            }
            other => panic!("expected non-monotonic error, got {other:?}"),
        }
        assert!(windows.next().is_none());
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn json_lines_reports_line_numbers() {
        let input = "\n{\"gid\":1,\"thread\":1,\"location\":1,\"kind\":{\"type\":\"branch\"}}\n{oops}\n";
        let mut reader = JsonLinesReader::new(input.as_bytes());
        assert!(matches!(reader.next(), Some(Ok(ev)) if ev.gid == 1));
        match reader.next() {
            Some(Err(IngestError::Malformed { line, .. })) => assert_eq!(line, 3),
            other => panic!("expected malformed line, got {other:?}"),
        }
    }
}

// Trace files hold one access per line:
//
//     P<id> <R|W> <address>    # optional comment
//
// Blank and comment-only lines are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, SimError};
use crate::msi::{Addr, CacheId, Op, TraceEvent};

/// Streams trace events one line at a time, so a bad line aborts a run only
/// once everything before it has been simulated.
pub struct TraceReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        TraceReader { lines: reader.lines(), line_no: 0 }
    }
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let entry = line.split('#').next().unwrap_or("").trim();
            if entry.is_empty() {
                continue;
            }
            return Some(parse_entry(self.line_no, entry));
        }
    }
}

/// Parses a single, comment-free trace entry.
pub fn parse_entry(line: usize, entry: &str) -> Result<TraceEvent> {
    let malformed = |reason| SimError::MalformedTrace { line, entry: entry.to_string(), reason };

    let mut parts = entry.split_whitespace();
    let (Some(who), Some(access), Some(address)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed("expected 'P<id> <R|W> <address>'"));
    };

    let processor = who
        .strip_prefix('P')
        .ok_or_else(|| malformed("processor must look like P<id>"))?
        .parse::<CacheId>()
        .map_err(|_| malformed("processor id is not a number"))?;
    let op = match access {
        "R" => Op::Read,
        "W" => Op::Write,
        _ => {
            return Err(SimError::UnknownAccessType { line, access: access.to_string() });
        }
    };
    let raw = address
        .parse::<i64>()
        .map_err(|_| malformed("address is not an integer"))?;

    Ok(TraceEvent { line, processor, op, addr: Addr::try_from(raw)? })
}

//! Per-execution byte buffers and the control signals that end a test run.
//!
//! A `Buffer` is the append-only log of every byte a single test execution
//! drew, together with the structure of those draws: one block per draw
//! call and one interval per example scope. The shrinker consumes that
//! structure, so a buffer is finalized exactly once before it is handed
//! over.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::tree::NodeId;

/// How a single test execution concluded. Later variants are strictly more
/// interesting to the engine, and the derived ordering is relied on when
/// deciding whether a new buffer supersedes the current best one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// The test asked for more bytes than the buffer allows.
    Overrun = 0,
    /// The test rejected its input as inapplicable.
    Invalid = 1,
    /// The test ran to completion without failing.
    Valid = 2,
    /// The test failed. This is what shrinking preserves.
    Interesting = 3,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Overrun => write!(f, "overrun"),
            Status::Invalid => write!(f, "invalid"),
            Status::Valid => write!(f, "valid"),
            Status::Interesting => write!(f, "interesting"),
        }
    }
}

/// The non-local signals that abort a test execution. These bubble up
/// through every draw with `?` and are handled in one place, by the
/// runner; user code never catches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    /// A draw ran past the buffer's byte budget.
    Overrun,
    /// The input does not apply to this test; see `Runner::invalid`.
    Invalid,
    /// The test failed; see `Runner::fail` and the `fatal!` macro.
    Fail,
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::Overrun => write!(f, "overrun"),
            Abort::Invalid => write!(f, "invalid input"),
            Abort::Fail => write!(f, "test failure"),
        }
    }
}

/// Result type threaded through generators and test functions.
pub type Draw<T> = Result<T, Abort>;

/// The byte log of one test execution.
///
/// Bytes only ever get appended, so `blocks` tiles `buf` exactly in draw
/// order. Example scopes nest by a stack discipline and produce
/// `intervals`; two sibling scopes that abut at the same nesting level
/// additionally produce a merged interval covering both, which gives the
/// shrinker coarser spans to delete in one step.
pub struct Buffer {
    pub(crate) status: Status,

    max_length: usize,
    index: usize,
    buf: Vec<u8>,
    pub(crate) overdraw: usize,

    pub(crate) blocks: Vec<(usize, usize)>,
    pub(crate) block_starts: HashMap<usize, Vec<usize>>,
    interval_stack: Vec<usize>,
    intervals: HashSet<(usize, usize)>,
    level: usize,
    last_levels: HashMap<usize, (usize, usize)>,

    pub(crate) node_index: Option<NodeId>,
    pub(crate) hit_novelty: bool,
    finalized: bool,
    pub(crate) sorted_intervals: Vec<(usize, usize)>,

    pub(crate) report: String,
}

impl Buffer {
    /// A fresh buffer that may hold at most `max_length` bytes.
    ///
    /// The initial status is `Overrun`: a buffer that never ran to any
    /// conclusion ranks below every buffer that did.
    pub fn new(max_length: usize) -> Buffer {
        Buffer {
            status: Status::Overrun,
            max_length,
            index: 0,
            buf: Vec::new(),
            overdraw: 0,
            blocks: Vec::new(),
            block_starts: HashMap::new(),
            interval_stack: Vec::new(),
            intervals: HashSet::new(),
            level: 0,
            last_levels: HashMap::new(),
            node_index: None,
            hit_novelty: false,
            finalized: false,
            sorted_intervals: Vec::new(),
            report: String::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The bytes drawn so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Count of bytes consumed; equal to `bytes().len()`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Text the test printed during this execution.
    pub fn report(&self) -> &str {
        &self.report
    }

    /// Check that `n` more bytes fit, recording by how much they would
    /// not.
    pub(crate) fn begin_draw(&mut self, n: usize) -> Draw<()> {
        if self.index + n > self.max_length {
            self.overdraw = self.index + n - self.max_length;
            return Err(Abort::Overrun);
        }
        Ok(())
    }

    /// Append the bytes of one draw call and record its block.
    pub(crate) fn record_draw(&mut self, bytes: &[u8]) {
        let initial = self.index;
        self.blocks.push((initial, initial + bytes.len()));
        self.buf.extend_from_slice(bytes);
        self.index += bytes.len();
    }

    /// Open an example scope at the current position.
    pub(crate) fn start_example(&mut self) {
        self.interval_stack.push(self.index);
        self.level += 1;
    }

    /// Close the innermost example scope. Empty scopes leave no trace.
    pub(crate) fn end_example(&mut self) {
        let top = self
            .interval_stack
            .pop()
            .expect("end_example without matching start_example");
        self.level -= 1;
        if top == self.index {
            return;
        }
        let interval = (top, self.index);
        self.intervals.insert(interval);
        if let Some(&(prev_start, prev_end)) = self.last_levels.get(&self.level) {
            if prev_end == interval.0 {
                self.intervals.insert((prev_start, interval.1));
            }
        }
        self.last_levels.insert(self.level, interval);
        let length = self.index - top;
        self.block_starts.entry(length).or_default().push(top);
    }

    /// Freeze the structural annotations. Idempotent.
    ///
    /// Intervals are ordered longest first (ties by earliest start) so the
    /// shrinker attacks big spans before small ones, and each
    /// `block_starts` list is ordered by the lexicographic value of the
    /// bytes it points at, simplest first.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let mut sorted: Vec<(usize, usize)> = self.intervals.iter().copied().collect();
        sorted.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));
        self.sorted_intervals = sorted;
        let buf = &self.buf;
        for (&length, starts) in self.block_starts.iter_mut() {
            starts.sort_by(|&a, &b| buf[a..a + length].cmp(&buf[b..b + length]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_tile_the_buffer() {
        let mut b = Buffer::new(64);
        b.begin_draw(3).unwrap();
        b.record_draw(&[1, 2, 3]);
        b.begin_draw(2).unwrap();
        b.record_draw(&[4, 5]);
        b.begin_draw(1).unwrap();
        b.record_draw(&[6]);

        assert_eq!(b.bytes(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(b.index(), 6);
        let covered: usize = b.blocks.iter().map(|(s, e)| e - s).sum();
        assert_eq!(covered, b.bytes().len());
        for w in b.blocks.windows(2) {
            assert_eq!(w[0].1, w[1].0);
        }
    }

    #[test]
    fn overrun_records_overdraw() {
        let mut b = Buffer::new(4);
        b.begin_draw(3).unwrap();
        b.record_draw(&[0, 0, 0]);
        let err = b.begin_draw(5).unwrap_err();
        assert_eq!(err, Abort::Overrun);
        assert_eq!(b.overdraw, 4);
    }

    #[test]
    fn empty_examples_leave_no_interval() {
        let mut b = Buffer::new(64);
        b.start_example();
        b.end_example();
        assert!(b.intervals.is_empty());
    }

    #[test]
    fn sibling_intervals_merge() {
        let mut b = Buffer::new(64);
        b.start_example();
        b.begin_draw(2).unwrap();
        b.record_draw(&[9, 9]);
        b.end_example();
        b.start_example();
        b.begin_draw(2).unwrap();
        b.record_draw(&[7, 7]);
        b.end_example();

        assert!(b.intervals.contains(&(0, 2)));
        assert!(b.intervals.contains(&(2, 4)));
        // abutting siblings at the same level produce the covering span
        assert!(b.intervals.contains(&(0, 4)));
    }

    #[test]
    fn nested_intervals_do_not_merge_across_levels() {
        let mut b = Buffer::new(64);
        b.start_example();
        b.start_example();
        b.begin_draw(1).unwrap();
        b.record_draw(&[1]);
        b.end_example();
        b.end_example();
        b.start_example();
        b.begin_draw(1).unwrap();
        b.record_draw(&[2]);
        b.end_example();

        assert!(b.intervals.contains(&(0, 1)));
        assert!(b.intervals.contains(&(1, 2)));
        // the inner (0,1) closed at level 1, the outer pair merges at level 0
        assert!(b.intervals.contains(&(0, 2)));
        for &(s, e) in &b.intervals {
            assert!(s < e && e <= b.bytes().len());
        }
    }

    #[test]
    fn finalize_sorts_intervals_longest_first() {
        let mut b = Buffer::new(64);
        b.start_example();
        b.start_example();
        b.begin_draw(1).unwrap();
        b.record_draw(&[1]);
        b.end_example();
        b.start_example();
        b.begin_draw(3).unwrap();
        b.record_draw(&[2, 3, 4]);
        b.end_example();
        b.end_example();
        b.finalize();

        for w in b.sorted_intervals.windows(2) {
            let (la, lb) = (w[0].1 - w[0].0, w[1].1 - w[1].0);
            assert!(la > lb || (la == lb && w[0].0 <= w[1].0));
        }
    }

    #[test]
    fn finalize_orders_block_starts_lexicographically() {
        let mut b = Buffer::new(64);
        for bytes in [[9u8, 9], [1, 1], [5, 5]] {
            b.start_example();
            b.begin_draw(2).unwrap();
            b.record_draw(&bytes);
            b.end_example();
        }
        b.finalize();
        let starts = &b.block_starts[&2];
        let values: Vec<&[u8]> = starts.iter().map(|&s| &b.bytes()[s..s + 2]).collect();
        assert_eq!(values, vec![&[1u8, 1][..], &[5, 5], &[9, 9]]);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut b = Buffer::new(64);
        b.start_example();
        b.begin_draw(2).unwrap();
        b.record_draw(&[3, 1]);
        b.end_example();
        b.finalize();
        let snapshot = b.sorted_intervals.clone();
        b.finalize();
        assert_eq!(snapshot, b.sorted_intervals);
    }

    #[test]
    fn status_ordering_prefers_interesting() {
        assert!(Status::Overrun < Status::Invalid);
        assert!(Status::Invalid < Status::Valid);
        assert!(Status::Valid < Status::Interesting);
    }
}

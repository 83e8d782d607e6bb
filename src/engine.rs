//! The runner: drives generation, novelty tracking and shrinking.
//!
//! A test function is executed repeatedly against fresh or mutated byte
//! buffers until it fails, the search space is exhausted, or the
//! generation budget runs out. A failing buffer is then shrunk to a fixed
//! point by a schedule of structure-aware passes, and the minimal run's
//! captured output is handed to the harness.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::{Abort, Buffer, Draw, Status};
use crate::minimize::minimize;
use crate::tree::Tree;

/// Where test failures are reported. The engine only ever calls this once
/// per `run`, with the output captured during the minimal failing
/// execution.
pub trait Harness {
    fn fail(&mut self, report: &str);
}

/// Fails the surrounding test by panicking with the report. The right
/// default under Rust's own test harness.
pub struct PanicHarness;

impl Harness for PanicHarness {
    fn fail(&mut self, report: &str) {
        panic!("found failing example:\n{report}");
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes a single execution may draw before it overruns.
    pub max_length: usize,
    /// Wall-clock budget for the generation phase. Shrinking is not time
    /// bounded; it terminates on a fixed point.
    pub generation_budget: Duration,
    /// Pin the meta PRNG for reproducible runs. The per-run PRNG is
    /// reseeded from it, so a fixed seed fixes the whole run, mutation
    /// choices included. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_length: 8 << 10,
            generation_budget: Duration::from_secs(1),
            seed: None,
        }
    }
}

/// How `draw_bytes` produces bytes for the current execution.
enum Policy {
    /// Sample fresh bytes and steer them away from explored regions.
    Random,
    /// Mutate the current best buffer with three strategies picked for
    /// this execution.
    Mutate([Strategy; 3]),
    /// Read back a shrink candidate verbatim.
    Replay(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
enum Strategy {
    New,
    Existing,
    Larger,
    Smaller,
    Zero,
    Constant,
    FlipBit,
}

const STRATEGY_LIBRARY: [Strategy; 7] = [
    Strategy::New,
    Strategy::Existing,
    Strategy::Larger,
    Strategy::Smaller,
    Strategy::Zero,
    Strategy::Constant,
    Strategy::FlipBit,
];

/// Number of mutated executions before reseeding from scratch.
const MUTATIONS_PER_SEED: u32 = 10;

pub struct Runner {
    config: Config,
    harness: Box<dyn Harness>,
    seeder: ChaCha8Rng,
    rnd: ChaCha8Rng,
    pub(crate) buf: Buffer,
    last_buf: Buffer,
    tree: Tree,
    policy: Policy,
    change: u64,
    start_time: Instant,
}

impl Runner {
    pub fn new(harness: impl Harness + 'static) -> Runner {
        Runner::with_config(harness, Config::default())
    }

    pub fn with_config(harness: impl Harness + 'static, config: Config) -> Runner {
        let mut seeder = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let rnd = ChaCha8Rng::seed_from_u64(seeder.gen());
        Runner {
            buf: Buffer::new(config.max_length),
            last_buf: Buffer::new(0),
            config,
            harness: Box::new(harness),
            seeder,
            rnd,
            tree: Tree::new(),
            policy: Policy::Random,
            change: 0,
            start_time: Instant::now(),
        }
    }

    /// Execute the full generation and shrink cycle for `f`.
    ///
    /// `f` is run many times and must be self-contained: either free of
    /// side effects or doing its own setup and teardown on every call. It
    /// aborts through the `Draw` result, never by catching the signals
    /// itself.
    pub fn run<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Runner) -> Draw<()>,
    {
        self.start_time = Instant::now();
        self.new_data();
        let mut mutations = 0u32;
        while !self.tree.root_dead() {
            self.run_once(&mut f);
            self.tree.add(&self.buf);
            if self.buf.status() == Status::Interesting {
                log::debug!(
                    "found interesting buffer of {} bytes, shrinking",
                    self.buf.index()
                );
                self.last_buf = mem::replace(&mut self.buf, Buffer::new(self.config.max_length));
                break;
            }
            if self.start_time.elapsed() > self.config.generation_budget {
                log::debug!("generation budget exhausted");
                return;
            }
            if mutations >= MUTATIONS_PER_SEED || !self.consider_new_buffer() {
                self.new_data();
                mutations = 0;
                continue;
            }
            mutations += 1;
            self.last_buf = mem::replace(&mut self.buf, Buffer::new(self.config.max_length));
            self.policy = self.new_mutator();
        }
        if self.last_buf.status() != Status::Interesting {
            log::debug!("search space exhausted without a failure");
            return;
        }
        self.last_buf.finalize();
        self.shrink(&mut f);
        self.harness.fail(&self.last_buf.report);
    }

    /// The minimal failing byte stream, once `run` has found one.
    pub fn counterexample(&self) -> Option<&[u8]> {
        if self.last_buf.status() == Status::Interesting {
            Some(self.last_buf.bytes())
        } else {
            None
        }
    }

    /// The output captured during the minimal failing execution.
    pub fn failure_report(&self) -> &str {
        self.last_buf.report()
    }

    /// Open an example scope; see `draw`.
    pub fn start_example(&mut self) {
        self.buf.start_example();
    }

    /// Close the innermost example scope.
    pub fn end_example(&mut self) {
        self.buf.end_example();
    }

    /// Fill a generator, bracketed by an example scope. The scope is the
    /// unit the shrinker deletes and rearranges, so one generator fill
    /// reads as one logical value.
    pub fn draw<G>(&mut self, g: &mut G) -> Draw<()>
    where
        G: crate::generators::Generator + ?Sized,
    {
        self.start_example();
        g.fill(self)?;
        self.end_example();
        Ok(())
    }

    /// Draw `n` bytes through the current policy.
    ///
    /// `sample` produces a domain-meaningful byte string from the per-run
    /// PRNG; the policy decides whether to use it, reuse bytes from the
    /// best buffer, or mutate. Callers must accept arbitrary bytes coming
    /// back, reinterpreting or rejecting via `invalid`.
    pub fn draw_bytes<S>(&mut self, n: usize, mut sample: S) -> Draw<Vec<u8>>
    where
        S: FnMut(&mut ChaCha8Rng, usize) -> Vec<u8>,
    {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.buf.begin_draw(n)?;
        let at = self.buf.index();

        if let Policy::Replay(source) = &self.policy {
            let bytes = source[at..at + n].to_vec();
            self.buf.record_draw(&bytes);
            return Ok(bytes);
        }

        let strategies = match &self.policy {
            Policy::Mutate(strategies) => Some(*strategies),
            _ => None,
        };
        let mut bytes = match strategies {
            None => sample(&mut self.rnd, n),
            Some(strategies) => {
                if at + n > self.last_buf.bytes().len() {
                    sample(&mut self.rnd, n)
                } else {
                    let pick = strategies[self.seeder.gen_range(0..strategies.len())];
                    self.mutate_draw(pick, at, n, &mut sample)
                }
            }
        };
        self.rewrite_novelty(&mut bytes);
        self.buf.record_draw(&bytes);
        Ok(bytes)
    }

    /// Record a line of test output against the current execution.
    pub fn emit(&mut self, args: fmt::Arguments<'_>) {
        use fmt::Write;
        let _ = writeln!(self.buf.report, "{args}");
    }

    /// Record the failure message and produce the signal that aborts this
    /// execution. Usually invoked through the `fatal!` macro.
    pub fn fail(&mut self, args: fmt::Arguments<'_>) -> Abort {
        self.emit(args);
        Abort::Fail
    }

    /// Signal that the current input does not apply to this test, e.g.
    /// after decoding bytes into a value the test cannot use.
    pub fn invalid<T>(&self) -> Draw<T> {
        Err(Abort::Invalid)
    }

    fn new_data(&mut self) {
        log::trace!("reseeding per-run rng");
        self.rnd = ChaCha8Rng::seed_from_u64(self.seeder.gen());
        self.buf = Buffer::new(self.config.max_length);
        self.policy = Policy::Random;
    }

    fn run_once<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Runner) -> Draw<()>,
    {
        let outcome = f(self);
        self.buf.status = match outcome {
            Ok(()) => Status::Valid,
            Err(Abort::Overrun) => Status::Overrun,
            Err(Abort::Invalid) => Status::Invalid,
            Err(Abort::Fail) => Status::Interesting,
        };
    }

    /// Pick three of the seven mutation strategies for the next
    /// execution; each draw then chooses among them.
    fn new_mutator(&mut self) -> Policy {
        let mut library = STRATEGY_LIBRARY;
        library.shuffle(&mut self.rnd);
        Policy::Mutate([library[0], library[1], library[2]])
    }

    fn mutate_draw<S>(&mut self, strategy: Strategy, at: usize, n: usize, sample: &mut S) -> Vec<u8>
    where
        S: FnMut(&mut ChaCha8Rng, usize) -> Vec<u8>,
    {
        match strategy {
            Strategy::New => sample(&mut self.rnd, n),
            Strategy::Existing => self.last_buf.bytes()[at..at + n].to_vec(),
            Strategy::Larger => {
                let existing = self.last_buf.bytes()[at..at + n].to_vec();
                let sampled = sample(&mut self.rnd, n);
                if sampled >= existing {
                    sampled
                } else {
                    larger_than(&mut self.rnd, &existing)
                }
            }
            Strategy::Smaller => {
                let existing = self.last_buf.bytes()[at..at + n].to_vec();
                let sampled = sample(&mut self.rnd, n);
                if sampled <= existing {
                    sampled
                } else {
                    smaller_than(&mut self.rnd, &existing)
                }
            }
            Strategy::Zero => vec![0; n],
            Strategy::Constant => {
                let v: u8 = self.rnd.gen();
                vec![v; n]
            }
            Strategy::FlipBit => {
                let mut bytes = self.last_buf.bytes()[at..at + n].to_vec();
                let i = self.rnd.gen_range(0..n);
                let k = self.rnd.gen_range(0..8);
                bytes[i] ^= 1 << k;
                bytes
            }
        }
    }

    /// Steer freshly proposed bytes away from known-dead regions of the
    /// tree. The walk follows `result` from the buffer's current tree
    /// position; a missing edge means the proposal is already novel, a
    /// dead edge gets substituted with an unexplored or live byte.
    fn rewrite_novelty(&mut self, result: &mut [u8]) {
        let tree = &self.tree;
        let buf = &mut self.buf;
        let mut id = match buf.node_index {
            Some(id) => id,
            None => {
                assert!(buf.bytes().is_empty(), "invalid node index");
                buf.node_index = Some(Tree::ROOT);
                Tree::ROOT
            }
        };
        if buf.hit_novelty {
            return;
        }
        // every path into a dead region should have been rewritten at an
        // earlier draw
        assert!(!tree.is_dead(id), "dead node entered by novelty rewrite");
        for slot in result.iter_mut() {
            let mut next = match tree.child(id, *slot) {
                Some(next) => next,
                None => {
                    buf.hit_novelty = true;
                    return;
                }
            };
            if tree.is_dead(next) {
                for candidate in 0..=255u8 {
                    match tree.child(id, candidate) {
                        None => {
                            *slot = candidate;
                            buf.hit_novelty = true;
                            return;
                        }
                        Some(child) => {
                            next = child;
                            if !tree.is_dead(child) {
                                *slot = candidate;
                                break;
                            }
                        }
                    }
                }
            }
            id = next;
        }
        buf.node_index = Some(id);
    }

    /// Accept the just-executed buffer over the current best?
    fn consider_new_buffer(&self) -> bool {
        let b = &self.buf;
        let last = &self.last_buf;
        if last.bytes() == b.bytes() {
            return false;
        }
        if last.status() != b.status() {
            return b.status() > last.status();
        }
        match b.status() {
            // got further before giving up
            Status::Invalid => b.index() >= last.index(),
            // needed less excess
            Status::Overrun => b.overdraw < last.overdraw,
            Status::Valid => true,
            Status::Interesting => {
                assert!(
                    b.bytes().len() <= last.bytes().len(),
                    "buffer grew in size during shrink"
                );
                if b.bytes().len() == last.bytes().len() {
                    assert!(
                        b.bytes() < last.bytes(),
                        "buffer grew in value during shrink"
                    );
                }
                true
            }
        }
    }

    /// Re-execute the test against a candidate byte stream and keep it if
    /// it is a strictly better interesting buffer.
    ///
    /// Candidates whose tree walk stays entirely within existing nodes
    /// have been tried before and are rejected without running; walks that
    /// hit a dead region cannot end interesting.
    fn try_shrink<F>(&mut self, f: &mut F, candidate: &[u8]) -> bool
    where
        F: FnMut(&mut Runner) -> Draw<()>,
    {
        assert_eq!(
            self.last_buf.status(),
            Status::Interesting,
            "shrink candidate without an interesting buffer"
        );
        let effective = self.last_buf.index();
        let candidate = if candidate.len() > effective {
            &candidate[..effective]
        } else {
            candidate
        };

        let mut id = Tree::ROOT;
        let mut novel = false;
        for &byte in candidate {
            if self.tree.is_dead(id) {
                return false;
            }
            match self.tree.child(id, byte) {
                Some(next) => id = next,
                None => {
                    novel = true;
                    break;
                }
            }
        }
        if !novel {
            return false;
        }

        self.buf = Buffer::new(candidate.len());
        self.policy = Policy::Replay(candidate.to_vec());
        self.run_once(f);
        self.tree.add(&self.buf);
        self.buf.finalize();
        if self.consider_new_buffer() {
            self.change += 1;
            self.last_buf = mem::replace(&mut self.buf, Buffer::new(self.config.max_length));
            true
        } else {
            false
        }
    }

    /// Run the shrink passes to a fixed point on the change counter.
    ///
    /// Passes are ordered cheapest-coarsest first; after the passes that
    /// remove or zero whole regions succeed, the loop restarts so the
    /// finer passes see the smaller buffer.
    fn shrink<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Runner) -> Draw<()>,
    {
        let mut change = None;
        while change != Some(self.change) {
            change = Some(self.change);
            log::debug!(
                "shrink round on {} bytes, {} accepted so far",
                self.last_buf.bytes().len(),
                self.change
            );

            // structured interval deletion, in halving group sizes
            let mut k = self.last_buf.sorted_intervals.len() / 2;
            while k > 0 {
                let mut i = 0;
                while i + k <= self.last_buf.sorted_intervals.len() {
                    let mut elide = vec![false; self.last_buf.bytes().len()];
                    for &(start, end) in &self.last_buf.sorted_intervals[i..i + k] {
                        for slot in elide[start..end].iter_mut() {
                            *slot = true;
                        }
                    }
                    let mut candidate = Vec::with_capacity(self.last_buf.bytes().len());
                    for (j, &byte) in self.last_buf.bytes().iter().enumerate() {
                        if !elide[j] {
                            candidate.push(byte);
                        }
                    }
                    if !self.try_shrink(f, &candidate) {
                        i += k;
                    }
                }
                k /= 2;
            }

            self.zero_blocks(f);

            // whole-buffer byte minimization; cautious, because every
            // candidate is matched lexicographically against the buffer it
            // came from
            let initial = self.last_buf.bytes().to_vec();
            minimize(&initial, |b| self.try_shrink(f, b), true);

            if change != Some(self.change) {
                continue;
            }

            // bulk replacement: copy each block over every strictly
            // greater block of the same length
            let mut i = 0;
            while i < self.last_buf.blocks.len() {
                let (u, v) = self.last_buf.blocks[i];
                let n = v - u;
                let block = self.last_buf.bytes()[u..v].to_vec();
                let mut candidate = self.last_buf.bytes().to_vec();
                for &(start, end) in &self.last_buf.blocks {
                    if end - start == n && self.last_buf.bytes()[start..end] > block[..] {
                        candidate[start..end].copy_from_slice(&block);
                    }
                }
                self.try_shrink(f, &candidate);
                i += 1;
            }

            // individual replacement: substitute each block with every
            // simpler same-length block
            let mut i = 0;
            while i < self.last_buf.blocks.len() {
                let (u, v) = self.last_buf.blocks[i];
                let n = v - u;
                let block = self.last_buf.bytes()[u..v].to_vec();
                let simpler: Vec<usize> = match self.last_buf.block_starts.get(&n) {
                    Some(starts) => {
                        let cut = starts
                            .partition_point(|&s| self.last_buf.bytes()[s..s + n] < block[..]);
                        starts[..cut].to_vec()
                    }
                    None => Vec::new(),
                };
                for start in simpler {
                    let mut candidate = self.last_buf.bytes().to_vec();
                    let replacement = self.last_buf.bytes()[start..start + n].to_vec();
                    candidate[u..v].copy_from_slice(&replacement);
                    if self.try_shrink(f, &candidate) {
                        break;
                    }
                }
                i += 1;
            }

            // minimize duplicated blocks together: a candidate is only
            // accepted if every occurrence can change in lockstep
            let mut block_change = None;
            while block_change != Some(self.change) {
                block_change = Some(self.change);
                let mut snapshot = self.last_buf.bytes().to_vec();
                let mut groups: BTreeMap<Vec<u8>, Vec<(usize, usize)>> = BTreeMap::new();
                for &(start, end) in &self.last_buf.blocks {
                    groups
                        .entry(self.last_buf.bytes()[start..end].to_vec())
                        .or_default()
                        .push((start, end));
                }
                groups.retain(|_, occurrences| occurrences.len() > 1);
                for (bytes, occurrences) in groups {
                    minimize(
                        &bytes,
                        |b| {
                            for &(start, end) in &occurrences {
                                snapshot[start..end].copy_from_slice(b);
                            }
                            self.try_shrink(f, &snapshot)
                        },
                        false,
                    );
                }
            }
            if change != Some(self.change) {
                continue;
            }

            // minimize each block in isolation
            let mut i = 0;
            while i < self.last_buf.blocks.len() {
                let (u, v) = self.last_buf.blocks[i];
                let initial = self.last_buf.bytes()[u..v].to_vec();
                minimize(
                    &initial,
                    |b| {
                        let mut candidate = self.last_buf.bytes().to_vec();
                        if v > candidate.len() {
                            // an accepted shrink shortened the buffer out
                            // from under this block
                            return false;
                        }
                        candidate[u..v].copy_from_slice(b);
                        self.try_shrink(f, &candidate)
                    },
                    false,
                );
                i += 1;
            }
            if change != Some(self.change) {
                continue;
            }

            // reorder same-length blocks into sorted byte order, longest
            // lengths first
            let mut lengths: Vec<usize> = self.last_buf.block_starts.keys().copied().collect();
            lengths.sort_unstable_by(|a, b| b.cmp(a));
            for n in lengths {
                let mut starts = starts_by_location(&self.last_buf, n);
                let mut i = 1;
                while i < starts.len() {
                    let mut j = i;
                    while j > 0 {
                        let a_start = starts[j - 1];
                        let b_start = starts[i];
                        let a = self.last_buf.bytes()[a_start..a_start + n].to_vec();
                        let b = self.last_buf.bytes()[b_start..b_start + n].to_vec();
                        if a <= b {
                            break;
                        }
                        let mut candidate = self.last_buf.bytes().to_vec();
                        candidate[a_start..a_start + n].copy_from_slice(&b);
                        candidate[b_start..b_start + n].copy_from_slice(&a);
                        if self.try_shrink(f, &candidate) {
                            starts = starts_by_location(&self.last_buf, n);
                            if i >= starts.len() {
                                break;
                            }
                            j -= 1;
                        } else {
                            break;
                        }
                    }
                    i += 1;
                }
            }
        }
    }

    /// Zero whole blocks: first binary-search the longest zeroable
    /// suffix of blocks, then sweep every block individually from last to
    /// first.
    fn zero_blocks<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut Runner) -> Draw<()>,
    {
        let num_blocks = self.last_buf.blocks.len();
        let (mut lo, mut hi) = (0, num_blocks);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mut candidate = self.last_buf.bytes().to_vec();
            let start = self.last_buf.blocks[mid].0;
            for byte in candidate[start..].iter_mut() {
                *byte = 0;
            }
            if self.try_shrink(f, &candidate) {
                // the suffix predicate is only meaningful while the block
                // layout is stable
                if self.last_buf.blocks.len() != num_blocks {
                    break;
                }
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        let mut i = self.last_buf.blocks.len() as isize - 1;
        while i >= 0 {
            let len = self.last_buf.blocks.len() as isize;
            if i >= len {
                // an accepted shrink changed the block count
                i = len - 1;
                continue;
            }
            let (u, v) = self.last_buf.blocks[i as usize];
            let mut candidate = self.last_buf.bytes().to_vec();
            for byte in candidate[u..v].iter_mut() {
                *byte = 0;
            }
            self.try_shrink(f, &candidate);
            i -= 1;
        }
    }
}

fn starts_by_location(b: &Buffer, length: usize) -> Vec<usize> {
    // finalization orders these by block simplicity; reordering wants
    // positions
    let mut starts = b.block_starts.get(&length).cloned().unwrap_or_default();
    starts.sort_unstable();
    starts
}

fn larger_than(rnd: &mut ChaCha8Rng, existing: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; existing.len()];
    let mut drew_larger = false;
    for (i, &e) in existing.iter().enumerate() {
        if !drew_larger {
            let span = 256 - e as u16;
            out[i] = e + rnd.gen_range(0..span) as u8;
            if out[i] > e {
                drew_larger = true;
            }
        } else {
            out[i] = rnd.gen();
        }
    }
    out
}

fn smaller_than(rnd: &mut ChaCha8Rng, existing: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; existing.len()];
    let mut drew_smaller = false;
    for (i, &e) in existing.iter().enumerate() {
        if !drew_smaller {
            out[i] = rnd.gen_range(0..=e);
            if out[i] < e {
                drew_smaller = true;
            }
        } else {
            out[i] = rnd.gen();
        }
    }
    out
}

/// Record a failure message and abort the current execution. Expands to a
/// `return`, so the enclosing function must return a [`Draw`].
///
/// ```ignore
/// if xs[i] > xs[i + 1] {
///     fatal!(r, "not sorted at {}: {:?}", i, xs);
/// }
/// ```
#[macro_export]
macro_rules! fatal {
    ($runner:expr, $($arg:tt)*) => {
        return Err($runner.fail(format_args!($($arg)*)))
    };
}

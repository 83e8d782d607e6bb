//! Surmise is a property-based testing engine built around a shrinkable
//! byte stream.
//!
//! A test function draws bytes through generators and fails with
//! `fatal!` when a property is violated. The engine records the structure
//! of every draw, deduplicates executions in a novelty tree, and when a
//! failure appears searches for the lexicographically smallest byte
//! stream that still fails, then reports that minimal run.
//!
//! ```ignore
//! let mut runner = Runner::new(PanicHarness);
//! runner.run(|r| {
//!     let mut xs = Vec::new();
//!     let mut gen = SliceGen::new(|r: &mut Runner| {
//!         xs.push(r.float64()?);
//!         Ok(())
//!     });
//!     r.draw(&mut gen)?;
//!     let mut sorted = xs.clone();
//!     sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
//!     if xs != sorted {
//!         fatal!(r, "came out unsorted: {:?}", xs);
//!     }
//!     Ok(())
//! });
//! ```

pub mod data;
pub mod engine;
pub mod floats;
pub mod generators;
pub mod minimize;
pub mod state;
pub mod tree;

pub use data::{Abort, Buffer, Draw, Status};
pub use engine::{Config, Harness, PanicHarness, Runner};
pub use floats::{decode_f64, encode_f64};
pub use generators::{
    uniform, BoolGen, ByteGen, Float64Gen, Generator, Int16Gen, IntUpTo, SliceGen, Uint64Gen,
};
pub use minimize::minimize;
pub use state::StateMachine;
pub use tree::{NodeId, Tree};

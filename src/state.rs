//! Model-based testing of stateful systems.
//!
//! A `StateMachine` holds a model value, a set of named transitions that
//! mutate it, and a set of named assertions checked after every step.
//! Filling the machine draws a sequence of transition indices using the
//! same continue-byte protocol as `SliceGen`, so the shrinker deletes and
//! reorders whole steps; a failing trace shrinks to a short sequence of
//! simple transitions.
//!
//! Transitions and assertions are registered explicitly on the builder:
//!
//! ```ignore
//! let mut machine = StateMachine::new(Counter::default())
//!     .transition("increment", |c: &mut Counter| c.value += 1)
//!     .assertion("bounded", |c, r| {
//!         if c.value > 3 {
//!             fatal!(r, "counter escaped: {}", c.value);
//!         }
//!         Ok(())
//!     })
//!     .printer(|c| format!("value: {}", c.value));
//! runner.draw(&mut machine)?;
//! ```

use crate::data::Draw;
use crate::engine::Runner;
use crate::generators::{bias_bool, Generator, IntUpTo};

/// Average number of steps under random generation.
const AVERAGE_STEPS: f64 = 50.0;

type TransitionFn<M> = Box<dyn FnMut(&mut M)>;
type AssertFn<M> = Box<dyn FnMut(&M, &mut Runner) -> Draw<()>>;
type PrintFn<M> = Box<dyn Fn(&M) -> String>;

pub struct StateMachine<M> {
    state: M,
    transitions: Vec<(String, TransitionFn<M>)>,
    assertions: Vec<(String, AssertFn<M>)>,
    printer: Option<PrintFn<M>>,
}

impl<M> StateMachine<M> {
    pub fn new(state: M) -> StateMachine<M> {
        StateMachine {
            state,
            transitions: Vec::new(),
            assertions: Vec::new(),
            printer: None,
        }
    }

    /// Register a named transition. Steps draw uniformly over the
    /// registered transitions, in registration order.
    pub fn transition(mut self, name: &str, f: impl FnMut(&mut M) + 'static) -> Self {
        self.transitions.push((name.to_string(), Box::new(f)));
        self
    }

    /// Register a named assertion, run against the model after every
    /// step. Assertions flag failures with `fatal!`.
    pub fn assertion(
        mut self,
        name: &str,
        f: impl FnMut(&M, &mut Runner) -> Draw<()> + 'static,
    ) -> Self {
        self.assertions.push((name.to_string(), Box::new(f)));
        self
    }

    /// Register a model printer; its output lands in the captured report
    /// after each step, so a failing trace reads as a story.
    pub fn printer(mut self, f: impl Fn(&M) -> String + 'static) -> Self {
        self.printer = Some(Box::new(f));
        self
    }

    pub fn state(&self) -> &M {
        &self.state
    }

    fn step(&mut self, d: &mut Runner, step_number: usize) -> Draw<()> {
        let mut index = IntUpTo::new(self.transitions.len() as i64);
        d.draw(&mut index)?;
        let (name, transition) = &mut self.transitions[index.value as usize];
        transition(&mut self.state);
        d.emit(format_args!("step {step_number}: {name}"));
        if let Some(printer) = &self.printer {
            d.emit(format_args!("{}", printer(&self.state)));
        }
        for (_, assertion) in self.assertions.iter_mut() {
            assertion(&self.state, d)?;
        }
        Ok(())
    }
}

impl<M> Generator for StateMachine<M> {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        assert!(
            !self.transitions.is_empty(),
            "state machine has no transitions"
        );
        let keep_going = 1.0 - 1.0 / (1.0 + AVERAGE_STEPS);
        let mut steps = 0usize;
        loop {
            d.start_example();
            let more = bias_bool(d, keep_going)?;
            if !more {
                d.end_example();
                return Ok(());
            }
            steps += 1;
            let result = self.step(d, steps);
            d.end_example();
            result?;
        }
    }
}

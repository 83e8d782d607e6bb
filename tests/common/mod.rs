use std::cell::RefCell;
use std::rc::Rc;

use surmise::{Config, Harness, Runner};

/// Captures the failure report instead of panicking, so tests can assert
/// on the minimal example the engine found.
pub struct Recording(Rc<RefCell<Option<String>>>);

impl Harness for Recording {
    fn fail(&mut self, report: &str) {
        *self.0.borrow_mut() = Some(report.to_string());
    }
}

pub fn recording_runner(seed: u64) -> (Runner, Rc<RefCell<Option<String>>>) {
    let failed = Rc::new(RefCell::new(None));
    let config = Config {
        seed: Some(seed),
        ..Config::default()
    };
    (
        Runner::with_config(Recording(failed.clone()), config),
        failed,
    )
}

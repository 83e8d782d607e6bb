//! The Die Hard jug puzzle as a state machine: the engine plays with a
//! 3-liter and a 5-liter jug until the big one holds exactly 4 liters,
//! then shrinks the trace to a short solution.

mod common;

use surmise::{fatal, StateMachine};

#[derive(Default)]
struct DieHard {
    small: i32,
    large: i32,
}

#[test]
fn finds_a_short_solution() {
    let (mut runner, failed) = common::recording_runner(0xd1e);
    runner.run(|r| {
        let mut machine = StateMachine::new(DieHard::default())
            .transition("fill small", |d: &mut DieHard| d.small = 3)
            .transition("fill large", |d: &mut DieHard| d.large = 5)
            .transition("empty small", |d: &mut DieHard| d.small = 0)
            .transition("empty large", |d: &mut DieHard| d.large = 0)
            .transition("pour large into small", |d: &mut DieHard| {
                let room = 3 - d.small;
                if d.large < room {
                    d.small += d.large;
                    d.large = 0;
                } else {
                    d.large -= room;
                    d.small = 3;
                }
            })
            .transition("pour small into large", |d: &mut DieHard| {
                let room = 5 - d.large;
                if d.small < room {
                    d.large += d.small;
                    d.small = 0;
                } else {
                    d.small -= room;
                    d.large = 5;
                }
            })
            .assertion("jug contents stay physical", |d, r| {
                if d.small > 3 || d.large > 5 || d.small < 0 || d.large < 0 {
                    fatal!(r, "impossible jug state: {} and {}", d.small, d.large);
                }
                Ok(())
            })
            .assertion("never measures four liters", |d, r| {
                if d.large == 4 {
                    fatal!(r, "measured four liters");
                }
                Ok(())
            })
            .printer(|d| format!("small: {} large: {}", d.small, d.large));
        r.draw(&mut machine)
    });

    let report = failed.borrow().clone().expect("the puzzle is solvable");
    assert!(report.contains("measured four liters"));
    assert!(report.contains("large: 4"));

    // the classic solution takes six pours; shrinking should get at least
    // close to it
    let steps = report.matches("step ").count();
    assert!(steps >= 1 && steps <= 7, "trace has {steps} steps");
}

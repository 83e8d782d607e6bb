//! A sorting property over drawn float slices: the engine should find an
//! unsorted pair and shrink it down to the simplest one.

mod common;

use surmise::{decode_f64, fatal, Runner, SliceGen};

fn sort_floats(xs: &mut [f64]) {
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

#[test]
fn unsorted_slice_shrinks_to_one_and_zero() {
    let (mut runner, failed) = common::recording_runner(0x50f7);
    runner.run(|r| {
        let mut xs: Vec<f64> = Vec::new();
        let mut gen = SliceGen::new(|r: &mut Runner| {
            let f = r.float64()?;
            xs.push(f);
            Ok(())
        });
        r.draw(&mut gen)?;
        let mut sorted = xs.clone();
        sort_floats(&mut sorted);
        for i in 0..xs.len().saturating_sub(1) {
            if xs[i] > xs[i + 1] {
                fatal!(r, "unsorted at {}, len {}: {:?}", i, xs.len(), xs);
            }
        }
        Ok(())
    });

    let report = failed.borrow().clone().expect("some slice is unsorted");
    assert!(report.contains("unsorted"));

    // minimal failing slice: two elements, [1.0, 0.0]; each element is a
    // continue byte followed by ten float bytes, then the stop byte
    let cx = runner.counterexample().expect("counterexample exists");
    assert_eq!(cx.len(), 23);
    assert_eq!(cx[0], 1);
    assert_eq!(cx[11], 1);
    assert_eq!(cx[22], 0);

    let mut raw = [0u8; 10];
    raw.copy_from_slice(&cx[1..11]);
    let (first, invalid) = decode_f64(&raw);
    assert!(!invalid);
    raw.copy_from_slice(&cx[12..22]);
    let (second, invalid) = decode_f64(&raw);
    assert!(!invalid);

    assert!(first > second);
    assert_eq!(first, 1.0);
    assert_eq!(second, 0.0);
}

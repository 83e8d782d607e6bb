//! Built-in value generators and the contract they share with the engine.
//!
//! A generator turns drawn bytes into a value of its own shape. Draws go
//! through a `Sample` function so that random generation can emit
//! meaningful and deliberately nasty values (NaN, infinities, boundary
//! integers) while mutation and replay stay free to substitute arbitrary
//! bytes; a generator must cope with whatever comes back, by
//! reinterpreting it or rejecting the input via `Runner::invalid`.

use once_cell::sync::Lazy;
use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;

use crate::data::Draw;
use crate::engine::Runner;
use crate::floats::{decode_f64, encode_f64};

/// Fills a value from drawn bytes. Pass implementations to
/// [`Runner::draw`], which brackets the fill in an example scope.
pub trait Generator {
    fn fill(&mut self, d: &mut Runner) -> Draw<()>;
}

/// The plain sample: uninterpreted uniform bytes, for generators where
/// every byte sequence is a valid value.
pub fn uniform(rnd: &mut ChaCha8Rng, n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rnd.fill_bytes(&mut bytes);
    bytes
}

/// One byte, lowest bit wins.
pub struct BoolGen(pub bool);

impl Generator for BoolGen {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let bytes = d.draw_bytes(1, uniform)?;
        self.0 = bytes[0] & 1 == 1;
        Ok(())
    }
}

pub struct ByteGen(pub u8);

impl Generator for ByteGen {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let bytes = d.draw_bytes(1, uniform)?;
        self.0 = bytes[0];
        Ok(())
    }
}

/// Eight big-endian bytes, so lexicographic shrinking is numeric
/// shrinking.
pub struct Uint64Gen(pub u64);

impl Generator for Uint64Gen {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let bytes = d.draw_bytes(8, uniform)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        self.0 = u64::from_be_bytes(raw);
        Ok(())
    }
}

pub struct Int16Gen(pub i16);

impl Generator for Int16Gen {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let bytes = d.draw_bytes(2, uniform)?;
        self.0 = i16::from_be_bytes([bytes[0], bytes[1]]);
        Ok(())
    }
}

/// Values that disproportionately break float-handling code. NaN and the
/// infinities are stacked several times over so random generation reaches
/// for them often.
static NASTY_FLOATS: Lazy<Vec<f64>> = Lazy::new(|| {
    let mut floats = vec![
        0.0,
        0.5,
        1.0 / 3.0,
        10e6,
        10e-6,
        1.175_494_351e-38,
        2.225_073_858_507_201_4e-308,
        1.797_693_134_862_315_7e308,
        3.402_823_466e38,
        9_007_199_254_740_992.0,
        1.0 - 10e-6,
        2.0 + 10e-6,
        1.192_092_896e-7,
        2.220_446_049_250_313e-16,
    ];
    for _ in 0..5 {
        floats.push(f64::NAN);
        floats.push(f64::INFINITY);
    }
    let negated: Vec<f64> = floats.iter().map(|f| -f).collect();
    floats.extend(negated);
    floats
});

fn float_sample(rnd: &mut ChaCha8Rng, n: usize) -> Vec<u8> {
    assert_eq!(n, 10, "float generator draws ten bytes");
    let f = match rnd.gen_range(0..10) {
        0..=4 => NASTY_FLOATS[rnd.gen_range(0..NASTY_FLOATS.len())],
        5 => return uniform(rnd, 10),
        6 => rnd.gen::<f64>() * f64::from(rnd.gen_range(0..2) * 2 - 1),
        7 => {
            // spread across magnitudes; plain uniform floats almost never
            // exercise extreme exponents
            (rnd.gen::<f64>() - 0.5) * 2.0f64.powi(rnd.gen_range(-300..=300))
        }
        _ => {
            let mut int = (rnd.gen::<u64>() >> 1) as i64;
            if rnd.gen_range(0..2) == 1 {
                int = -int;
            }
            int as f64
        }
    };
    encode_f64(f).to_vec()
}

/// A float drawn through the 10-byte shrink-ordered encoding, so smaller
/// byte streams decode to simpler numbers.
pub struct Float64Gen(pub f64);

impl Generator for Float64Gen {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let bytes = d.draw_bytes(10, float_sample)?;
        let mut raw = [0u8; 10];
        raw.copy_from_slice(&bytes);
        let (f, invalid) = decode_f64(&raw);
        if invalid {
            return d.invalid();
        }
        self.0 = f;
        Ok(())
    }
}

/// A bounded non-negative integer in `[0, n)`. Replayed byte streams that
/// decode out of range reject the input.
pub struct IntUpTo {
    pub n: i64,
    pub value: i64,
}

impl IntUpTo {
    pub fn new(n: i64) -> IntUpTo {
        assert!(n > 0, "IntUpTo needs a positive bound");
        IntUpTo { n, value: 0 }
    }
}

impl Generator for IntUpTo {
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let n = self.n;
        let bytes = d.draw_bytes(8, move |rnd: &mut ChaCha8Rng, _| {
            let value = rnd.gen_range(0..n);
            (value as u64).to_be_bytes().to_vec()
        })?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        let value = u64::from_be_bytes(raw) as i64;
        if value >= self.n || value < 0 {
            return d.invalid();
        }
        self.value = value;
        Ok(())
    }
}

/// One byte biased towards 1 with probability `p`; nonzero means true.
pub(crate) fn bias_bool(d: &mut Runner, p: f64) -> Draw<bool> {
    let bytes = d.draw_bytes(1, move |rnd: &mut ChaCha8Rng, _| {
        let roll: f64 = rnd.gen();
        vec![u8::from(roll < p)]
    })?;
    Ok(bytes[0] != 0)
}

/// Repeatedly calls a function that builds one element, with a biased
/// continue byte drawn before each element.
///
/// Asking "one more?" per element instead of drawing a length up front
/// means deleting an element's span from the byte stream simply drops the
/// element, which is exactly the shape interval deletion produces.
pub struct SliceGen<F> {
    /// Average number of elements under random generation.
    pub avg: usize,
    pub min: usize,
    pub max: usize,
    f: F,
}

impl<F> SliceGen<F>
where
    F: FnMut(&mut Runner) -> Draw<()>,
{
    pub fn new(f: F) -> SliceGen<F> {
        SliceGen {
            avg: 50,
            min: 0,
            max: usize::MAX,
            f,
        }
    }
}

impl<F> Generator for SliceGen<F>
where
    F: FnMut(&mut Runner) -> Draw<()>,
{
    fn fill(&mut self, d: &mut Runner) -> Draw<()> {
        let mut len = 0usize;
        let keep_going = 1.0 - 1.0 / (1.0 + self.avg as f64);
        while len < self.max {
            d.start_example();
            let more = bias_bool(d, keep_going)?;
            if !more && len >= self.min {
                d.end_example();
                return Ok(());
            }
            len += 1;
            let result = (self.f)(d);
            d.end_example();
            result?;
        }
        Ok(())
    }
}

impl Runner {
    /// Draw a boolean.
    pub fn boolean(&mut self) -> Draw<bool> {
        let mut g = BoolGen(false);
        self.draw(&mut g)?;
        Ok(g.0)
    }

    /// Draw a byte.
    pub fn byte(&mut self) -> Draw<u8> {
        let mut g = ByteGen(0);
        self.draw(&mut g)?;
        Ok(g.0)
    }

    /// Draw a float, with the usual bias towards nasty values.
    pub fn float64(&mut self) -> Draw<f64> {
        let mut g = Float64Gen(0.0);
        self.draw(&mut g)?;
        Ok(g.0)
    }

    /// Draw a uniform u64.
    pub fn uint64(&mut self) -> Draw<u64> {
        let mut g = Uint64Gen(0);
        self.draw(&mut g)?;
        Ok(g.0)
    }

    /// Draw a uniform i16.
    pub fn int16(&mut self) -> Draw<i16> {
        let mut g = Int16Gen(0);
        self.draw(&mut g)?;
        Ok(g.0)
    }

    /// Draw an integer in `[0, n)`.
    pub fn int_up_to(&mut self, n: i64) -> Draw<i64> {
        let mut g = IntUpTo::new(n);
        self.draw(&mut g)?;
        Ok(g.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Config, Harness};
    use rand::SeedableRng;

    struct Ignore;

    impl Harness for Ignore {
        fn fail(&mut self, _report: &str) {}
    }

    fn seeded_runner(seed: u64) -> Runner {
        Runner::with_config(
            Ignore,
            Config {
                seed: Some(seed),
                generation_budget: std::time::Duration::from_millis(50),
                ..Config::default()
            },
        )
    }

    #[test]
    fn uniform_returns_requested_length() {
        let mut rnd = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(uniform(&mut rnd, 0).len(), 0);
        assert_eq!(uniform(&mut rnd, 17).len(), 17);
    }

    #[test]
    fn nasty_floats_are_heavy_on_nan_and_inf() {
        let nans = NASTY_FLOATS.iter().filter(|f| f.is_nan()).count();
        let infs = NASTY_FLOATS.iter().filter(|f| f.is_infinite()).count();
        assert_eq!(nans, 10);
        assert_eq!(infs, 10);
    }

    #[test]
    fn float_sample_always_encodes_ten_bytes() {
        let mut rnd = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..200 {
            assert_eq!(float_sample(&mut rnd, 10).len(), 10);
        }
    }

    #[test]
    fn generators_draw_their_documented_widths() {
        let mut r = seeded_runner(11);
        r.run(|r| {
            let _ = r.boolean()?;
            assert_eq!(r.buf.index(), 1);
            let _ = r.uint64()?;
            assert_eq!(r.buf.index(), 9);
            let _ = r.int16()?;
            assert_eq!(r.buf.index(), 11);
            let _ = r.float64()?;
            assert_eq!(r.buf.index(), 21);
            Ok(())
        });
    }

    #[test]
    fn int_up_to_stays_in_range() {
        let mut r = seeded_runner(12);
        r.run(|r| {
            let value = r.int_up_to(37)?;
            assert!((0..37).contains(&value));
            Ok(())
        });
    }

    #[test]
    fn slice_gen_respects_min_and_max() {
        let mut r = seeded_runner(13);
        r.run(|r| {
            let mut count = 0usize;
            let mut gen = SliceGen::new(|r: &mut Runner| {
                count += 1;
                let _ = r.byte()?;
                Ok(())
            });
            gen.min = 2;
            gen.max = 5;
            gen.avg = 3;
            r.draw(&mut gen)?;
            assert!((2..=5).contains(&count));
            Ok(())
        });
    }

    #[test]
    fn drawn_floats_decode_from_the_buffer() {
        let mut r = seeded_runner(14);
        r.run(|r| {
            let f = r.float64()?;
            let bytes = r.buf.bytes();
            let mut raw = [0u8; 10];
            raw.copy_from_slice(&bytes[bytes.len() - 10..]);
            let (decoded, invalid) = decode_f64(&raw);
            assert!(!invalid);
            assert_eq!(f.to_bits(), decoded.to_bits());
            Ok(())
        });
    }
}

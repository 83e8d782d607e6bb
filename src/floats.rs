//! A 10-byte encoding of `f64` whose lexicographic order tracks how
//! "simple" a float is, so that byte-level shrinking moves decoded values
//! towards human-friendly ones.
//!
//! Layout: byte 0 is the sign, bytes 1..8 hold the 52-bit mantissa
//! little-endian (trailing-zero mantissas, i.e. fractions with few
//! significant digits, sort first), bytes 8..10 hold a re-biased
//! big-endian exponent. Zero encodes as all zeroes and an exponent of one
//! encodes as zero, keeping 0 simpler than 1 and 1 simpler than
//! everything else. Negative exponents, subnormals and NaN/Inf are pushed
//! into the high half of the exponent space, in that order.

const MANTISSA_MASK: u64 = (1 << 52) - 1;

/// Sentinel exponents, in the signed space fed to `lex16`.
const SUBNORMAL_EXP: i16 = -1024;
const NON_FINITE_EXP: i16 = -1025;

/// Map a negative exponent so that values closer to zero sort first and
/// the whole negative range sorts after every non-negative exponent.
fn lex16(s: i16) -> u16 {
    ((-s) as u16) | (1 << 15)
}

/// Encode `f` into its 10-byte shrink-ordered representation.
pub fn encode_f64(f: f64) -> [u8; 10] {
    let bits = f.to_bits();
    let mut b = [0u8; 10];
    b[0] = (bits >> 63) as u8;

    let mantissa = bits & MANTISSA_MASK;
    b[1..8].copy_from_slice(&mantissa.to_le_bytes()[..7]);

    let raw_exp = ((bits >> 52) & 0x7ff) as i16;
    let exp: u16 = if raw_exp == 0 {
        if mantissa != 0 {
            lex16(SUBNORMAL_EXP)
        } else {
            0
        }
    } else if raw_exp == 0x7ff {
        lex16(NON_FINITE_EXP)
    } else {
        let unbiased = raw_exp - 1023;
        if unbiased >= 0 {
            unbiased as u16 + 1
        } else {
            lex16(unbiased)
        }
    };
    b[8..10].copy_from_slice(&exp.to_be_bytes());
    b
}

/// Decode a 10-byte representation. The second return value is true when
/// the bytes are not a valid encoding (the sign byte is neither 0 nor 1),
/// which replayed or mutated byte streams routinely produce.
pub fn decode_f64(b: &[u8; 10]) -> (f64, bool) {
    let sign = b[0];
    if sign > 1 {
        return (0.0, true);
    }
    let mut bits = (sign as u64) << 63;

    let mut mantissa_bytes = [0u8; 8];
    mantissa_bytes[..7].copy_from_slice(&b[1..8]);
    let mut mantissa = u64::from_le_bytes(mantissa_bytes);

    let mut exp = u16::from_be_bytes([b[8], b[9]]);
    if exp & (1 << 15) != 0 {
        let s = (exp & 0x7fff) as i16;
        if s == -SUBNORMAL_EXP {
            exp = 0;
        } else if s == -NON_FINITE_EXP {
            exp = 0x7ff;
        } else {
            exp = (-s + 1023) as u16;
        }
    } else if exp != 0 {
        exp = exp - 1 + 1023;
    } else if mantissa != 0 {
        // exponent bytes say zero but the mantissa disagrees; collapse to
        // zero rather than invent a subnormal
        mantissa = 0;
    }

    bits ^= mantissa & MANTISSA_MASK;
    bits ^= (exp as u64) << 52;
    (f64::from_bits(bits), false)
}

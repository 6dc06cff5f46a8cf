//! Big-endian binary artifacts for the target.

use petal_types::fixed::Number;
use petal_types::result::TintColor;

/// The constant table: one 32-bit big-endian word per pool entry, in
/// sorted pool order.
pub fn encode_constants(constants: &[Number]) -> Vec<u8> {
    let mut out = Vec::with_capacity(constants.len() * 4);
    for &value in constants {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

/// The color script: 16-bit big-endian entries. Each frame change is
/// announced by a negated delta-frame marker, followed by
/// `rgb | (index << 12)` per palette update in that frame, terminated by
/// the 0x8000 sentinel.
pub fn encode_color_script(colors: &[TintColor]) -> Vec<u8> {
    let mut words: Vec<u16> = Vec::new();
    let mut frame: i32 = -1;
    for color in colors {
        if color.frame as i32 != frame {
            let delta = color.frame as i32 - frame;
            frame = color.frame as i32;
            words.push((-delta) as u16);
        }
        words.push(color.rgb | ((color.index as u16) << 12));
    }
    words.push(0x8000);

    let mut out = Vec::with_capacity(words.len() * 2);
    for word in words {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out
}

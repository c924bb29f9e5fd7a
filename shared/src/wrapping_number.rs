//! Comparisons over `u16` sequence numbers that wrap around.
//!
//! Two sequence numbers are compared by the signed distance between them,
//! which is meaningful as long as the numbers in flight never span more than
//! half of the sequence space.

use crate::types::SequenceNumber;

const HALF_RANGE: u16 = u16::MAX / 2 + 1;

/// Returns whether `s1` comes after `s2`
/// sequence_greater_than(2, 1) == true
/// sequence_greater_than(0, 65535) == true
pub fn sequence_greater_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    s1 != s2 && s1.wrapping_sub(s2) < HALF_RANGE
}

/// Returns whether `s1` comes before `s2`
pub fn sequence_less_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    sequence_greater_than(s2, s1)
}

/// Signed number of steps needed to move from `from` to `to`.
///
/// ```
/// # use courier_shared::sequence_distance;
/// assert_eq!(sequence_distance(1, 2), 1);
/// assert_eq!(sequence_distance(2, 1), -1);
/// assert_eq!(sequence_distance(65535, 0), 1);
/// assert_eq!(sequence_distance(0, 65535), -1);
/// ```
pub fn sequence_distance(from: SequenceNumber, to: SequenceNumber) -> i32 {
    let forward = to.wrapping_sub(from);
    if forward < HALF_RANGE {
        i32::from(forward)
    } else {
        i32::from(forward) - i32::from(u16::MAX) - 1
    }
}

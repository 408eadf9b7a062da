//! Registration sequence numbers.
//!
//! Every proxy binding update carries a 16 bit sequence number which the
//! acknowledgement echoes, matching the two messages to each other, and
//! which the binding cache compares against the last accepted value to
//! reject replayed registrations
//! ([RFC 6275 §9.5.1](https://datatracker.ietf.org/doc/html/rfc6275#section-9.5.1)).
//! The counter is per mobile node and wraps, so the acceptance check is
//! modular: everything in the half-space behind the last accepted value is
//! a replay, everything else (including the value itself) is acceptable.

use core::fmt;

/// Size of the replay window: out of the 2^16 possible values, the 2^15
/// strictly behind the last accepted one are rejected.
const REPLAY_WINDOW: u16 = 32_768;

/// A registration sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqNo(u16);

impl SeqNo {
    /// The sequence number a gateway starts with for a mobile node it has
    /// not served before.
    pub const INITIAL: SeqNo = SeqNo(1);

    /// The sequence number for the next registration of the same mobile
    /// node, wrapping at the end of the counter space.
    #[must_use]
    pub fn next(self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }

    /// Whether an update carrying this sequence number must be rejected
    /// when `last` was the last accepted one.
    ///
    /// Equality is deliberately inside the window: a retransmitted update
    /// echoes the sequence number it was first sent with, and a gateway
    /// seeing a mobile node for the first time may start its counter on
    /// exactly the value the anchor already holds. Both are valid
    /// registrations, only strictly older values are replays.
    ///
    /// Two values exactly half the counter space apart are each inside the
    /// other's window. That pairing cannot come from a live gateway (it
    /// would take 2^15 lost registrations), so the ambiguity is accepted
    /// rather than special-cased.
    pub fn out_of_window(&self, last: &SeqNo) -> bool {
        self.0 != last.0 && last.0.wrapping_sub(self.0) < REPLAY_WINDOW
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{}", self.0))
    }
}

impl From<u16> for SeqNo {
    fn from(value: u16) -> Self {
        SeqNo(value)
    }
}

impl From<SeqNo> for u16 {
    fn from(value: SeqNo) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::SeqNo;

    #[test]
    fn retransmit_echo_is_accepted() {
        // A retransmitted update repeats its sequence number; the anchor
        // must not treat the echo as a replay.
        let last = SeqNo::from(7);
        assert!(!SeqNo::from(7).out_of_window(&last));
    }

    #[test]
    fn handoff_collision_is_accepted() {
        // A second gateway starts at the initial value while the anchor
        // already accepted that value from the first one.
        let last = SeqNo::INITIAL;
        assert!(!SeqNo::INITIAL.out_of_window(&last));
        // And a fresh counter slightly behind an advanced session is still
        // a replay.
        assert!(SeqNo::INITIAL.out_of_window(&SeqNo::from(10)));
    }

    #[test]
    fn older_registrations_are_replays() {
        let last = SeqNo::from(10);
        assert!(SeqNo::from(5).out_of_window(&last));
        assert!(SeqNo::from(9).out_of_window(&last));
        assert!(!SeqNo::from(11).out_of_window(&last));
        assert!(!SeqNo::from(30_000).out_of_window(&last));
    }

    #[test]
    fn window_follows_the_wrapping_counter() {
        // A session which wrapped the counter keeps rejecting the values
        // from just before the wrap.
        let last = SeqNo::from(u16::MAX).next().next();
        assert_eq!(last, SeqNo::from(1));
        assert!(SeqNo::from(u16::MAX).out_of_window(&last));
        assert!(!SeqNo::from(2).out_of_window(&last));
    }

    #[test]
    fn opposite_window_edge_is_ambiguous() {
        // Values exactly half the counter space apart sit in each other's
        // window and both pass; see the method docs.
        let a = SeqNo::from(0);
        let b = SeqNo::from(32_768);
        assert!(!a.out_of_window(&b));
        assert!(!b.out_of_window(&a));

        // One step further and the order is unambiguous again.
        let c = SeqNo::from(32_769);
        assert!(c.out_of_window(&a));
        assert!(!a.out_of_window(&c));
    }

    #[test]
    fn next_advances_and_wraps() {
        assert_eq!(SeqNo::INITIAL.next(), SeqNo::from(2));
        assert_eq!(SeqNo::from(u16::MAX).next(), SeqNo::from(0));
    }
}

//! Property tests for the pagination cursor's wire form.
//!
//! 1. Every timestamp survives encode → decode.
//! 2. Anything containing a non-digit is rejected, never misread.
//! 3. Absence is always "first page", never an error.

use duet_proto::cursor::{Cursor, CursorError};
use duet_proto::message::Timestamp;
use proptest::prelude::*;

proptest! {
    #[test]
    fn any_timestamp_survives_the_wire(millis in any::<u64>()) {
        let cursor = Cursor::before(Timestamp::from_millis(millis));
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        prop_assert_eq!(decoded.timestamp().as_millis(), millis);
    }

    #[test]
    fn non_digit_input_is_malformed(raw in "[0-9]{0,5}[^0-9][ -~]{0,5}") {
        prop_assert!(matches!(Cursor::decode(&raw), Err(CursorError::Malformed(_))));
    }

    #[test]
    fn present_values_decode_or_fail_explicitly(raw in ".{0,24}") {
        match Cursor::decode_optional(Some(&raw)) {
            Ok(Some(cursor)) => prop_assert_eq!(cursor.encode().parse::<u64>().ok(), raw.parse::<u64>().ok()),
            Ok(None) => prop_assert!(false, "present cursor decoded as absent"),
            Err(_) => {}
        }
    }

    #[test]
    fn cursors_order_like_their_timestamps(a in any::<u64>(), b in any::<u64>()) {
        let ca = Cursor::before(Timestamp::from_millis(a));
        let cb = Cursor::before(Timestamp::from_millis(b));
        prop_assert_eq!(ca.cmp(&cb), a.cmp(&b));
    }
}

#[test]
fn absent_cursor_is_first_page() {
    assert_eq!(Cursor::decode_optional(None), Ok(None));
}

#[test]
fn empty_cursor_is_distinct_from_absent() {
    assert_eq!(Cursor::decode_optional(Some("")), Err(CursorError::Empty));
}

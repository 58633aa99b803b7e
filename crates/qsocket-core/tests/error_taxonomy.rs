//! 错误分类的区间性质：对任意整数码值，四个谓词至多一个为真，且与 `classify` 一致。

use proptest::prelude::*;
use qsocket_core::{
    ErrorCategory, ErrorCode, classify, describe, is_config, is_connection, is_read_write,
    is_state,
};

fn predicates(code: i32) -> [bool; 4] {
    [
        is_config(code),
        is_connection(code),
        is_read_write(code),
        is_state(code),
    ]
}

proptest! {
    #[test]
    fn predicates_are_mutually_exclusive(code in any::<i32>()) {
        let hits = predicates(code).iter().filter(|hit| **hit).count();
        prop_assert!(hits <= 1);
        prop_assert_eq!(hits == 1, classify(code).is_some());
    }

    #[test]
    fn config_range_classifies_as_config(code in 1000i32..=1999) {
        prop_assert_eq!(classify(code), Some(ErrorCategory::Config));
        prop_assert!(is_config(code));
    }

    #[test]
    fn connection_range_classifies_as_connection(code in 2000i32..=2999) {
        prop_assert_eq!(classify(code), Some(ErrorCategory::Connection));
        prop_assert!(is_connection(code));
    }

    #[test]
    fn read_write_range_classifies_as_read_write(code in 3000i32..=3999) {
        prop_assert_eq!(classify(code), Some(ErrorCategory::ReadWrite));
        prop_assert!(is_read_write(code));
    }

    #[test]
    fn state_range_classifies_as_state(code in 4000i32..=4999) {
        prop_assert_eq!(classify(code), Some(ErrorCategory::State));
        prop_assert!(is_state(code));
    }

    #[test]
    fn describe_never_returns_empty(code in any::<i32>()) {
        prop_assert!(!describe(code).is_empty());
    }
}

#[test]
fn typed_category_agrees_with_numeric_classification() {
    for code in ErrorCode::ALL {
        assert_eq!(classify(code.as_i32()), Some(code.category()), "{code:?}");
    }
}

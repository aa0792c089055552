// crates/shape-load-core/tests/proptest_shape.rs
// ============================================================================
// Module: Shape Validation Property-Based Tests
// Description: Property tests for the offset/shape id exclusivity rule.
// Purpose: Confirm validation accepts exactly the consistent positions.
// ============================================================================

//! Property-based tests for shape validation.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use shape_load_core::INITIAL_OFFSET;
use shape_load_core::Shape;
use shape_load_core::ShapeParams;
use shape_load_core::ShapeState;
use shape_load_core::validate;

fn offset_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just(INITIAL_OFFSET.to_string()), "[0-9]{1,6}_[0-9]{1,3}"]
}

fn shape_id_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[0-9]{1,6}-[0-9]{1,8}")
}

fn shape(offset: String, shape_id: Option<String>, live: bool) -> Shape {
    Shape::new("http://localhost:3000/v1/shape/", "items").with_params(ShapeParams {
        offset,
        shape_id,
        cursor: None,
        live,
    })
}

proptest! {
    #[test]
    fn valid_iff_initial_offset_excludes_shape_id(
        offset in offset_strategy(),
        shape_id in shape_id_strategy(),
        live in any::<bool>(),
    ) {
        let initial = offset == INITIAL_OFFSET;
        let expected = initial != shape_id.is_some() && !(live && initial);
        prop_assert_eq!(validate(&shape(offset, shape_id, live)).is_ok(), expected);
    }

    #[test]
    fn redirect_never_leaves_state_invalid(
        shape_id in "[0-9]{1,6}-[0-9]{1,8}",
        offset in offset_strategy(),
    ) {
        let mut state = ShapeState::new(shape("0_0".to_string(), Some("1-1".to_string()), true)).unwrap();
        state.apply_redirect(shape_id, offset).unwrap();
        prop_assert!(validate(state.get()).is_ok());
    }
}

use tracing::debug;

use crate::detect::Detection;

/// Exact-match change policy: a value is new iff it is non-empty and differs
/// from the last accepted one.
pub fn accept(candidate: &str, last_accepted: Option<&str>) -> bool {
    !candidate.is_empty() && Some(candidate) != last_accepted
}

/// Picks at most one new value per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// The first detection, in adapter order, that `accept` lets through.
    /// Later detections in the same frame are ignored.
    pub fn select<'a>(
        &self,
        detections: &'a [Detection],
        last_accepted: Option<&str>,
    ) -> Option<&'a Detection> {
        let selected = detections
            .iter()
            .find(|d| accept(&d.decoded_value, last_accepted));
        if selected.is_none() && !detections.is_empty() {
            debug!(
                candidates = detections.len(),
                "no new value in frame, suppressed"
            );
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_is_never_accepted() {
        assert!(!accept("", None));
        assert!(!accept("", Some("a")));
    }

    #[test]
    fn first_value_is_accepted() {
        assert!(accept("story1", None));
    }

    #[test]
    fn exact_match_only() {
        assert!(!accept("story1", Some("story1")));
        assert!(accept("story1 ", Some("story1")));
        assert!(accept("Story1", Some("story1")));
    }

    #[test]
    fn selects_first_differing_in_adapter_order() {
        let detections = vec![
            Detection::text("A", 0.9),
            Detection::text("", 0.9),
            Detection::text("B", 0.9),
            Detection::text("C", 0.9),
        ];
        let selected = ChangeDetector::new().select(&detections, Some("A"));
        assert_eq!(selected.map(|d| d.decoded_value.as_str()), Some("B"));
    }

    #[test]
    fn steady_view_selects_nothing() {
        let detections = vec![Detection::code("A", None), Detection::code("A", None)];
        assert!(ChangeDetector::new().select(&detections, Some("A")).is_none());
    }

    proptest! {
        #[test]
        fn accept_iff_nonempty_and_different(v in "[ab]{0,3}", last in proptest::option::of("[ab]{0,3}")) {
            let expected = !v.is_empty() && last.as_deref() != Some(v.as_str());
            prop_assert_eq!(accept(&v, last.as_deref()), expected);
        }

        #[test]
        fn same_value_is_never_accepted_twice(v in ".*") {
            prop_assert!(!accept(&v, Some(&v)));
        }
    }
}

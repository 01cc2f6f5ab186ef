//! Position codec properties.
//!
//! Positions are generated against each other repeatedly, the way list
//! insertions use them, and must stay strictly ordered and well formed.

use livetree::crdt::{Position, compare_positions, make_position};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn assert_well_formed(position: &Position) {
    assert!(!position.as_str().is_empty());
    assert!(
        position.as_str().bytes().all(|b| (32..=126).contains(&b)),
        "position {position:?} left the alphabet"
    );
    assert_eq!(&Position::parse(position.as_str()).unwrap(), position);
}

// ===== OPEN ENDS =====

#[test]
fn test_appending_stays_ordered() {
    let mut last = make_position(None, None).unwrap();
    for _ in 0..500 {
        let next = make_position(Some(&last), None).unwrap();
        assert!(last < next, "{last:?} !< {next:?}");
        assert_well_formed(&next);
        last = next;
    }
}

#[test]
fn test_prepending_stays_ordered() {
    let mut first = make_position(None, None).unwrap();
    for _ in 0..500 {
        let previous = make_position(None, Some(&first)).unwrap();
        assert!(previous < first, "{previous:?} !< {first:?}");
        assert_well_formed(&previous);
        first = previous;
    }
}

// ===== BETWEEN NEIGHBOURS =====

#[test]
fn test_repeated_bisection_toward_lower_bound() {
    let low = make_position(None, None).unwrap();
    let mut high = make_position(Some(&low), None).unwrap();
    for _ in 0..200 {
        let mid = make_position(Some(&low), Some(&high)).unwrap();
        assert!(low < mid && mid < high);
        assert_well_formed(&mid);
        high = mid;
    }
}

#[test]
fn test_repeated_bisection_toward_upper_bound() {
    let mut low = make_position(None, None).unwrap();
    let high = make_position(Some(&low), None).unwrap();
    for _ in 0..200 {
        let mid = make_position(Some(&low), Some(&high)).unwrap();
        assert!(low < mid && mid < high);
        assert_well_formed(&mid);
        low = mid;
    }
}

#[test]
fn test_random_insertions_keep_sorted_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut positions: Vec<Position> = Vec::new();
    for _ in 0..1000 {
        let index = rng.gen_range(0..=positions.len());
        let before = index.checked_sub(1).map(|i| &positions[i]);
        let after = positions.get(index);
        let position = make_position(before, after).unwrap();
        positions.insert(index, position);
    }
    for pair in positions.windows(2) {
        assert_eq!(
            compare_positions(&pair[0], &pair[1]).unwrap(),
            std::cmp::Ordering::Less
        );
    }
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(sorted, positions);
}

// ===== CONTRACT ERRORS =====

#[test]
fn test_position_contract_errors() {
    let a = make_position(None, None).unwrap();
    let b = make_position(Some(&a), None).unwrap();

    let err = compare_positions(&a, &a).unwrap_err();
    assert!(err.is_contract_error());

    let err = make_position(Some(&b), Some(&a)).unwrap_err();
    assert!(err.is_position_error());
    let err = make_position(Some(&a), Some(&a)).unwrap_err();
    assert!(err.is_position_error());

    assert!(Position::parse("").is_err());
    assert!(Position::parse("a\u{7f}").is_err());
    assert!(Position::parse("é").is_err());
    assert!(Position::parse("a ").unwrap_err().is_position_error());
}

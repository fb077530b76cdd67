//! Integration tests for the recency-window generator.

use probepool::config::GeneratorConfig;
use probepool::generator::{Generator, Strategy};
use std::collections::HashSet;
use std::sync::Arc;

fn config(prefixes: &[&str], suffix_width: u32, window: usize) -> GeneratorConfig {
    GeneratorConfig {
        prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        suffix_width,
        window,
    }
}

// ---------------------------------------------------------------------------
// Uniqueness
// ---------------------------------------------------------------------------

#[test]
fn sequential_draws_within_window_are_distinct() {
    let generator = Generator::with_seed(&config(&["67", "96"], 4, 1_000), 7).unwrap();
    assert_eq!(generator.strategy(), Strategy::Rejection);

    let items: Vec<_> = (0..1_000).map(|_| generator.next()).collect();
    let distinct: HashSet<_> = items.iter().collect();
    assert_eq!(distinct.len(), items.len());
}

#[test]
fn concurrent_draws_within_window_are_distinct() {
    let generator = Arc::new(Generator::with_seed(&config(&["11", "22", "33"], 4, 4_000), 3).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let generator = Arc::clone(&generator);
            std::thread::spawn(move || (0..500).map(|_| generator.next()).collect::<Vec<_>>())
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for item in handle.join().unwrap() {
            assert!(all.insert(item.clone()), "duplicate identifier {item}");
        }
    }
    assert_eq!(all.len(), 4_000);
    assert_eq!(generator.issued(), 4_000);
}

#[test]
fn identifiers_have_prefix_and_fixed_width_suffix() {
    let generator = Generator::with_seed(&config(&["67", "96"], 5, 100), 1).unwrap();
    for _ in 0..200 {
        let item = generator.next();
        let s = item.as_str();
        assert_eq!(s.len(), 7);
        assert!(s.starts_with("67") || s.starts_with("96"), "bad prefix: {s}");
        assert!(s.chars().all(|c| c.is_ascii_digit()));
    }
}

// ---------------------------------------------------------------------------
// Window bound
// ---------------------------------------------------------------------------

#[test]
fn window_never_exceeds_capacity() {
    let generator = Generator::with_seed(&config(&["5"], 4, 64), 11).unwrap();
    for n in 1..=1_000u64 {
        generator.next();
        assert!(generator.window_len() <= 64);
        if n >= 64 {
            assert_eq!(generator.window_len(), 64);
        }
    }
    assert_eq!(generator.capacity(), 64);
}

#[test]
fn reset_clears_window_and_issue_count() {
    let generator = Generator::with_seed(&config(&["5"], 4, 64), 11).unwrap();
    for _ in 0..100 {
        generator.next();
    }
    generator.reset();
    assert_eq!(generator.window_len(), 0);
    assert_eq!(generator.issued(), 0);
    generator.next();
    assert_eq!(generator.window_len(), 1);
}

// ---------------------------------------------------------------------------
// Small domains
// ---------------------------------------------------------------------------

#[test]
fn small_domain_yields_1500_distinct_without_hanging() {
    // Two prefixes x 1000 suffixes = 2000 identifiers, window 500.
    let generator = Generator::new(&config(&["11", "22"], 3, 500)).unwrap();
    assert_eq!(generator.domain_size(), 2_000);
    assert_eq!(generator.strategy(), Strategy::Permutation);

    let items: HashSet<_> = (0..1_500).map(|_| generator.next()).collect();
    assert_eq!(items.len(), 1_500);
}

#[test]
fn permutation_keeps_trailing_window_unique_across_reshuffles() {
    let generator = Generator::with_seed(&config(&["1"], 2, 40), 5).unwrap();
    assert_eq!(generator.strategy(), Strategy::Permutation);

    let items: Vec<_> = (0..1_000).map(|_| generator.next()).collect();
    for chunk in items.windows(40) {
        let distinct: HashSet<_> = chunk.iter().collect();
        assert_eq!(distinct.len(), 40);
    }
}

#[test]
fn domain_below_twice_window_is_rejected() {
    let err = Generator::new(&config(&["1"], 2, 60)).unwrap_err();
    assert!(err.to_string().contains("cannot sustain"), "{err}");
}

#[test]
fn invalid_shapes_are_rejected() {
    assert!(Generator::new(&config(&[], 3, 10)).is_err());
    assert!(Generator::new(&config(&["1"], 0, 1)).is_err());
    assert!(Generator::new(&config(&["1"], 10, 1)).is_err());
    assert!(Generator::new(&config(&["1"], 3, 0)).is_err());
}

#[test]
fn repeated_prefix_is_rejected() {
    let repeated = config(&["11", "11"], 3, 500);
    let err = Generator::new(&repeated).unwrap_err();
    assert!(err.to_string().contains("more than once"), "{err}");
    assert!(Generator::with_seed(&config(&["11", "22", "11"], 3, 500), 1).is_err());
}

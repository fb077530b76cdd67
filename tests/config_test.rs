use probepool::config::{Config, IdentityAssignment, recommended_workers};
use probepool::model::OutcomeKind;
use std::path::PathBuf;

#[test]
fn empty_toml_yields_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.generator.prefixes, vec!["67", "96", "98", "63", "93"]);
    assert_eq!(config.generator.suffix_width, 7);
    assert_eq!(config.generator.window, 250_000);
    assert_eq!(config.breaker.failure_threshold, 12);
    assert_eq!(config.breaker.cooldown_ms, 2_000);
    assert_eq!(config.writer.flush_interval_ms, 2_000);
    assert_eq!(
        config.outcomes.persist,
        vec![OutcomeKind::Success, OutcomeKind::DeferredRetryLater]
    );
    config.validate().unwrap();
}

#[test]
fn toml_sections_override_defaults() {
    let config = Config::from_toml(
        r#"
        log_level = "debug"

        [generator]
        prefixes = ["11", "22"]
        suffix_width = 3
        window = 500

        [pool]
        workers = 4
        auto_limit = false
        item_delay_ms = 0

        [breaker]
        failure_threshold = 5
        cooldown_ms = 750

        [outcomes]
        deferred_enabled = false
        persist = ["success", "already_done"]

        [writer]
        dir = "out"
        flush_count = 5

        [writer.files]
        success = "hits.txt"
        "#,
    )
    .unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.generator.prefixes, vec!["11", "22"]);
    assert_eq!(config.generator.domain_size(), 2_000);
    assert_eq!(config.pool.effective_workers(), 4);
    assert_eq!(config.breaker.cooldown().as_millis(), 750);
    assert!(!config.outcomes.deferred_enabled);
    assert_eq!(config.writer.path_for(OutcomeKind::Success), PathBuf::from("out/hits.txt"));
    assert_eq!(
        config.writer.path_for(OutcomeKind::AlreadyDone),
        PathBuf::from("out/already_done.txt")
    );
    config.validate().unwrap();
}

#[test]
fn free_form_prefixes_are_normalized() {
    let config = Config::from_toml(
        r#"
        [generator]
        prefixes = ["67; 96", "98|63", "x"]
        "#,
    )
    .unwrap();
    assert_eq!(config.generator.prefixes, vec!["67", "96", "98", "63"]);
}

#[test]
fn unknown_category_is_a_parse_error() {
    let err = Config::from_toml(
        r#"
        [outcomes]
        persist = ["bogus"]
        "#,
    );
    assert!(err.is_err());
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn small() -> Config {
    let mut config = Config::default();
    config.generator.prefixes = vec!["11".into(), "22".into()];
    config.generator.suffix_width = 3;
    config.generator.window = 500;
    config
}

#[test]
fn domain_must_cover_twice_the_window() {
    let mut config = small();
    config.validate().unwrap();

    config.generator.window = 1_001;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("too small"), "{err}");
}

#[test]
fn zero_thresholds_are_rejected() {
    let mut config = small();
    config.breaker.failure_threshold = 0;
    assert!(config.validate().is_err());

    let mut config = small();
    config.writer.flush_count = 0;
    assert!(config.validate().is_err());

    let mut config = small();
    config.pool.workers = 0;
    assert!(config.validate().is_err());

    let mut config = small();
    config.stats.rate_window_ms = 500;
    assert!(config.validate().is_err());
}

#[test]
fn non_digit_prefix_is_rejected() {
    let mut config = small();
    config.generator.prefixes = vec!["1a".into()];
    assert!(config.validate().is_err());
}

#[test]
fn repeated_prefix_is_rejected() {
    let mut config = small();
    config.generator.prefixes = vec!["11".into(), "11".into()];
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("more than once"), "{err}");

    let dir = tempfile::tempdir().unwrap();
    let driver = std::sync::Arc::new(probepool::driver::SimulatedDriver::default());
    config.writer.dir = dir.path().to_path_buf();
    assert!(probepool::engine::PoolController::new(driver, config).is_err());
}

#[test]
fn explicit_identities_must_be_distinct_and_sufficient() {
    let mut config = small();
    config.pool.auto_limit = false;
    config.pool.workers = 2;

    config.identities.explicit = vec!["a".into(), "a".into()];
    assert!(config.validate().is_err());

    config.identities.explicit = vec!["a".into()];
    assert!(config.validate().is_err());

    config.identities.explicit = vec!["a".into(), "b".into()];
    config.validate().unwrap();
}

#[test]
fn persisted_categories_need_distinct_files() {
    let mut config = small();
    config
        .writer
        .files
        .insert("deferred".to_string(), "valid.txt".to_string());
    assert!(config.validate().is_err());
}

// ---------------------------------------------------------------------------
// Workers and identities
// ---------------------------------------------------------------------------

#[test]
fn effective_workers_respects_limits() {
    let mut config = small();
    config.pool.auto_limit = false;
    config.pool.workers = 50;
    assert_eq!(config.pool.effective_workers(), 20);

    config.pool.auto_limit = true;
    config.pool.workers = 50;
    assert_eq!(config.pool.effective_workers(), recommended_workers());
    assert!((2..=16).contains(&recommended_workers()));
}

#[test]
fn sequential_identities_use_profile_directories() {
    let assignment = IdentityAssignment::Sequential {
        base: 3,
        root: PathBuf::from("profiles"),
    };
    let identities = assignment.assign(2).unwrap();
    assert_eq!(identities[0].worker, 1);
    assert_eq!(identities[0].token, PathBuf::from("profiles/profile_03").display().to_string());
    assert_eq!(identities[1].token, PathBuf::from("profiles/profile_04").display().to_string());
}

#[test]
fn explicit_identities_need_enough_tokens() {
    let assignment = IdentityAssignment::Explicit(vec!["a".into()]);
    assert!(assignment.assign(2).is_err());
    assert_eq!(assignment.assign(1).unwrap()[0].token, "a");
}

#[test]
fn identity_dirs_are_created_and_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let assignment = IdentityAssignment::Sequential {
        base: 1,
        root: dir.path().join("profiles"),
    };

    let created = assignment.create_dirs(3).unwrap();
    assert_eq!(created.len(), 3);
    assert!(dir.path().join("profiles/profile_01").is_dir());
    assert!(dir.path().join("profiles/profile_03").is_dir());

    let removed = assignment.clear_dirs(5).unwrap();
    assert_eq!(removed.len(), 3);
    assert!(!dir.path().join("profiles/profile_02").exists());
}

// ---------------------------------------------------------------------------
// Files and environment
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/probepool.toml");
    let mut config = small();
    config.breaker.failure_threshold = 7;
    config.identities.explicit = vec!["p1".into(), "p2".into()];
    config.save(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.generator.prefixes, config.generator.prefixes);
    assert_eq!(loaded.breaker.failure_threshold, 7);
    assert_eq!(loaded.identities.explicit, vec!["p1", "p2"]);
    assert_eq!(loaded.outcomes.persist, config.outcomes.persist);
}

#[test]
fn env_overrides_file_values_and_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("probepool.toml");
    small().save(&path).unwrap();

    unsafe {
        std::env::set_var("PROBEPOOL_WORKERS", "3");
        std::env::set_var("PROBEPOOL_PREFIXES", "44, 55");
        std::env::set_var("PROBEPOOL_OUTPUT_DIR", "/tmp/probepool-out");
    }
    let loaded = Config::load(Some(&path));
    unsafe {
        std::env::remove_var("PROBEPOOL_WORKERS");
        std::env::remove_var("PROBEPOOL_PREFIXES");
        std::env::remove_var("PROBEPOOL_OUTPUT_DIR");
    }

    let config = loaded.unwrap();
    assert_eq!(config.pool.workers, 3);
    assert_eq!(config.generator.prefixes, vec!["44", "55"]);
    assert_eq!(config.writer.dir, PathBuf::from("/tmp/probepool-out"));

    // Environment-mutating checks share one test to avoid races.
    let mut config = small();
    unsafe {
        std::env::set_var("PROBEPOOL_WINDOW", "lots");
    }
    let result = config.apply_env();
    unsafe {
        std::env::remove_var("PROBEPOOL_WINDOW");
    }
    assert!(result.is_err());

    // A missing file loads defaults without failing.
    let missing = Config::load(Some(&dir.path().join("missing.toml"))).unwrap();
    assert_eq!(missing.generator.window, Config::default().generator.window);
    assert_eq!(missing.pool.workers, Config::default().pool.workers);
}

#[test]
fn from_file_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(Config::from_file(&missing).is_err());
}

//! Environment overrides. Kept in its own test binary: the variables are
//! process-wide and would leak into the file-based config tests.

use std::env;

use rstest::rstest;

use grabtree::application::ApplicationError;
use grabtree::config::Settings;

#[rstest]
#[case("GRABTREE_SIMULATION__WORKERS", "lots")]
#[case("GRABTREE_TREE__SEED", "-3")]
#[case("GRABTREE_TREE__ROOT", "pyramid")]
fn given_malformed_env_override_when_loading_then_config_error(
    #[case] key: &str,
    #[case] value: &str,
) {
    // Cases share the process environment; run them one at a time.
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    env::set_var(key, value);

    let result = Settings::load(None);

    env::remove_var(key);
    assert!(
        matches!(result, Err(ApplicationError::Config { .. })),
        "{key}={value} gave {result:?}"
    );
}

#[test]
fn given_valid_env_override_when_loading_then_it_wins_over_defaults() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    env::set_var("GRABTREE_SIMULATION__WORKERS", "9");

    let result = Settings::load(None);

    env::remove_var("GRABTREE_SIMULATION__WORKERS");
    assert_eq!(result.unwrap().simulation.workers, 9);
}

static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

use std::io::Write;

use mind_graph::options::{OptionsError, SessionOptions};
use mind_graph::scheduler::KahnTieBreaker;

#[test]
fn loads_options_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
loss = "loss"
enable_pruning = false
execution_phases = 2
do_not_update = ["embedding"]
anchors = ["logits"]

[scheduler]
kahn_tie_breaker = "random"
seed = 7
swap_limit = 500
"#
    )
    .expect("write options");

    let options = SessionOptions::load(file.path()).expect("load");
    assert_eq!(options.loss.as_deref(), Some("loss"));
    assert!(!options.enable_pruning);
    assert!(options.do_not_update.contains("embedding"));
    assert_eq!(options.anchors, vec!["logits".to_string()]);

    let scheduler = options.scheduler_options();
    assert_eq!(scheduler.kahn_tie_breaker, KahnTieBreaker::Random);
    assert_eq!(scheduler.seed, 7);
    assert_eq!(scheduler.swap_limit, 500);
    assert_eq!(scheduler.execution_phases, 2);
}

#[test]
fn missing_file_and_bad_values() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = SessionOptions::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, OptionsError::Io(_)));

    let err = SessionOptions::from_toml_str("execution_phases = 0").unwrap_err();
    assert!(matches!(err, OptionsError::ZeroPhases));

    let err = SessionOptions::from_toml_str("enable_pruning = \"yes\"").unwrap_err();
    assert!(matches!(err, OptionsError::Toml(_)));
}

#[test]
fn empty_file_gives_defaults() {
    let options = SessionOptions::from_toml_str("").expect("defaults");
    assert_eq!(options, SessionOptions::default());
    assert_eq!(options.execution_phases, 1);
    assert!(options.loss.is_none());
}

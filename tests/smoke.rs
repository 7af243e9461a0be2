use assert_cmd::Command;

const BAGS: &str = r#"{"entity":"e0","slot_value":"v","sentences":[["fa"],["fa"]],"positive":["A"],"negative":["B"]}
{"entity":"e1","slot_value":"v","sentences":[["fn"],["fn"]],"negative":["A","B"]}
{"entity":"e2","slot_value":"v","sentences":[["fb"],["fb"]],"positive":["B"],"negative":["A"]}
{"entity":"e3","slot_value":"v","sentences":[["fa"],["fa"]],"positive":["A"],"negative":["B"]}
{"entity":"e4","slot_value":"v","sentences":[["fn"],["fn"]],"negative":["A","B"]}
{"entity":"e5","slot_value":"v","sentences":[["fb"],["fb"]],"positive":["B"],"negative":["A"]}
"#;

#[test]
fn cli_help_runs() {
    let mut cmd = Command::cargo_bin("miml-re").expect("binary exists");
    cmd.arg("--help").assert().success();
}

#[test]
fn inspect_without_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("miml-re").expect("binary exists");
    cmd.env("DATA_DIR", dir.path())
        .env("OUTPUTS_DIR", dir.path().join("out"))
        .args(["inspect", "--model", "missing.miml"])
        .assert()
        .failure();
}

#[test]
fn train_then_classify() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bags.jsonl"), BAGS).unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{"folds": 3, "epochs": 2, "z_regularization": 0.1}"#)
        .unwrap();

    Command::cargo_bin("miml-re")
        .unwrap()
        .env("DATA_DIR", dir.path())
        .env("OUTPUTS_DIR", dir.path().join("out"))
        .env("MIML_THREADS", "2")
        .args(["train", "--dataset", "bags.jsonl", "--config", "config.json", "--model", "model.miml"])
        .assert()
        .success();
    assert!(dir.path().join("model.miml").exists());
    assert!(dir.path().join("out/sentence_stats.parquet").exists());

    Command::cargo_bin("miml-re")
        .unwrap()
        .env("DATA_DIR", dir.path())
        .env("OUTPUTS_DIR", dir.path().join("out"))
        .args(["classify", "--dataset", "bags.jsonl", "--mode", "noisy-or"])
        .assert()
        .success();
    let csv = std::fs::read_to_string(dir.path().join("out/predictions.csv")).unwrap();
    assert_eq!(csv.lines().count(), 1 + 6 * 2);
}

mod common;

use miml_re::{
    em::JointBayesTrainer,
    model::{JointModel, OutputMode},
};

#[test]
fn saved_model_scores_bit_identically() {
    let mut data = common::six_bags();
    data.add_bag("entity6", "value", &[vec!["fa"], vec!["fb"]], &["A"], &[], &[])
        .unwrap();
    let outcome = JointBayesTrainer::new(common::config(), 2)
        .unwrap()
        .train(&mut data)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models/joint.miml");
    outcome.model.save(&path).unwrap();
    let restored = JointModel::load(&path).unwrap();
    assert_eq!(restored, outcome.model);

    let held_out = vec![
        restored.index_sentence(&["fa", "fb"]),
        restored.index_sentence(&["fn", "never-seen"]),
    ];
    for mode in [
        OutputMode::JointBayes,
        OutputMode::NoisyOr,
        OutputMode::ThresholdNoisyOr,
    ] {
        let before = outcome.model.classify_bag(&held_out, mode);
        let after = restored.classify_bag(&held_out, mode);
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(b.probability.to_bits(), a.probability.to_bits());
            assert_eq!(b.provenance, a.provenance);
        }
    }
}

#[test]
fn loading_garbage_reports_a_format_error() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"not a model at all").unwrap();
    let err = JointModel::load(file.path()).unwrap_err();
    assert!(matches!(err, miml_re::MimlError::Format(_)));
}

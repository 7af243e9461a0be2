mod common;

use miml_re::{
    config::ExtractorConfig,
    data::{Dataset, GoldLabel},
    em::{checkpoint_path, EmState, JointBayesTrainer},
    model::JointModel,
    MimlError,
};

/// Like `six_bags`, plus a bag positive for A whose second sentence looks
/// like B, so the first E-step has a label to flip.
fn dataset_with_flip() -> Dataset {
    let mut data = common::six_bags();
    data.add_bag("entity6", "value", &[vec!["fa"], vec!["fb"]], &["A"], &[], &[])
        .unwrap();
    data
}

#[test]
fn clean_data_converges_before_the_epoch_budget() {
    let mut data = common::six_bags();
    let config = ExtractorConfig {
        epochs: 5,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 2).unwrap().train(&mut data).unwrap();
    assert_eq!(outcome.state, EmState::Converged);
    assert!(outcome.epochs_run < 5);
    assert_eq!(outcome.flips_per_epoch.last(), Some(&0));
}

#[test]
fn epoch_budget_bounds_the_run() {
    for inference in ["iterative", "stable"] {
        let mut data = dataset_with_flip();
        let config = ExtractorConfig {
            epochs: 3,
            squash_randomization: false,
            inference: inference.into(),
            ..common::config()
        };
        let outcome = JointBayesTrainer::new(config, 2).unwrap().train(&mut data).unwrap();
        assert!(outcome.epochs_run <= 3);
        assert!(outcome.state.is_terminal());
        assert_eq!(outcome.flips_per_epoch.len(), outcome.epochs_run);
        match outcome.state {
            EmState::MaxEpochsReached => {
                assert_eq!(outcome.epochs_run, 3);
                assert!(outcome.flips_per_epoch.iter().all(|&f| f > 0));
            }
            EmState::Converged => assert_eq!(outcome.flips_per_epoch.last(), Some(&0)),
            other => panic!("unexpected terminal state {other:?}"),
        }
    }
}

#[test]
fn zero_epochs_stops_after_initialisation() {
    let mut data = common::six_bags();
    let config = ExtractorConfig {
        epochs: 0,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 1).unwrap().train(&mut data).unwrap();
    assert_eq!(outcome.state, EmState::MaxEpochsReached);
    assert_eq!(outcome.epochs_run, 0);
    assert_eq!(outcome.model.z_classifiers.len(), 3);
}

#[test]
fn parallel_arrays_stay_aligned_after_shuffling() {
    let mut data = dataset_with_flip();
    data.bags[6].fixed[1] = Some(GoldLabel::Relation(1));
    let config = ExtractorConfig {
        squash_randomization: false,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 3).unwrap().train(&mut data).unwrap();
    assert_eq!(outcome.z_labels.len(), data.len());
    for (bag, z) in data.bags.iter().zip(&outcome.z_labels) {
        assert_eq!(bag.sentences.len(), z.len());
        assert_eq!(bag.sentence_ids.len(), z.len());
        assert_eq!(bag.fixed.len(), z.len());
        for (fixed, &label) in bag.fixed.iter().zip(z) {
            if let Some(gold) = fixed {
                assert_eq!(gold.to_z(data.z_space()), label);
            }
        }
    }
    let gold_row = data.bags[6]
        .sentence_ids
        .iter()
        .position(|id| id == "entity6|value|1")
        .unwrap();
    assert_eq!(data.bags[6].sentences[gold_row], vec![data.features.id_of("fb").unwrap()]);
    assert_eq!(outcome.statistics.len(), 14);
}

#[test]
fn local_only_mode_skips_em() {
    let mut data = common::six_bags();
    let config = ExtractorConfig {
        train_y: false,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 2).unwrap().train(&mut data).unwrap();
    assert_eq!(outcome.state, EmState::LocalOnly);
    assert_eq!(outcome.epochs_run, 0);
    assert!(outcome.model.merged_z.is_none());
    assert_eq!(outcome.statistics.len(), 12);
}

#[test]
fn too_few_bags_for_the_folds_is_a_configuration_error() {
    let mut data = common::six_bags();
    data.bags.truncate(2);
    let err = JointBayesTrainer::new(common::config(), 1)
        .unwrap()
        .train(&mut data)
        .unwrap_err();
    assert!(matches!(err, MimlError::Config(_)));
}

#[test]
fn relation_without_examples_fails_the_m_step() {
    let mut data = dataset_with_flip();
    // C is declared but no bag is labelled with it
    data.labels.add("C");
    let err = JointBayesTrainer::new(common::config(), 2)
        .unwrap()
        .train(&mut data)
        .unwrap_err();
    assert!(matches!(
        err,
        MimlError::EmptyTrainingSet { ref relation, epoch: 0 } if relation == "C"
    ));
}

#[test]
fn checkpoints_are_written_per_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.miml");
    let mut data = dataset_with_flip();
    let config = ExtractorConfig {
        epochs: 2,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 2)
        .unwrap()
        .with_model_path(&model_path)
        .train(&mut data)
        .unwrap();
    assert!(outcome.flips_per_epoch[0] > 0);
    let checkpoint = checkpoint_path(&model_path, 0);
    let restored = JointModel::load(&checkpoint).unwrap();
    assert_eq!(restored.labels, outcome.model.labels);
    assert_eq!(restored.y_models.len(), 2);
}

#[test]
fn unwritable_checkpoints_do_not_abort_training() {
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let model_path = blocker.path().join("nested/model.miml");
    let mut data = dataset_with_flip();
    let outcome = JointBayesTrainer::new(common::config(), 2)
        .unwrap()
        .with_model_path(&model_path)
        .train(&mut data)
        .unwrap();
    assert!(outcome.epochs_run >= 1);
    assert!(!checkpoint_path(&model_path, 0).exists());
}

#[test]
fn cached_initial_classifiers_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("initial.miml");
    let config = ExtractorConfig {
        initial_model: Some(cache.clone()),
        train_y: false,
        ..common::config()
    };
    let first = JointBayesTrainer::new(config.clone(), 2)
        .unwrap()
        .train(&mut common::six_bags())
        .unwrap();
    assert!(cache.exists());
    let second = JointBayesTrainer::new(config, 2)
        .unwrap()
        .train(&mut common::six_bags())
        .unwrap();
    assert_eq!(first.model.z_classifiers, second.model.z_classifiers);
}

/// `dataset_with_flip` with relation B left unknown on the mixed bag.
fn dataset_with_unknown() -> Dataset {
    let mut data = common::six_bags();
    data.add_bag("entity6", "value", &[vec!["fa"], vec!["fb"]], &["A"], &[], &["B"])
        .unwrap();
    data
}

#[test]
fn relabeling_waits_for_the_second_epoch() {
    let mut data = dataset_with_unknown();
    let b = data.labels.id_of("B").unwrap();
    let config = ExtractorConfig {
        epochs: 1,
        relabel: true,
        relabel_fraction: 0.9,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 2).unwrap().train(&mut data).unwrap();
    assert_eq!(outcome.relabeled, vec![None]);
    assert!(data.bags[6].unknown.contains(&b));
}

#[test]
fn later_epochs_resolve_unknown_labels() {
    let mut data = dataset_with_unknown();
    let b = data.labels.id_of("B").unwrap();
    let config = ExtractorConfig {
        epochs: 3,
        relabel: true,
        relabel_fraction: 0.9,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 2).unwrap().train(&mut data).unwrap();
    assert!(outcome.flips_per_epoch[0] > 0);
    assert_eq!(outcome.relabeled[0], None);
    let second = outcome.relabeled[1].expect("relabeling runs from epoch 1");
    // 14 labelled pairs, round(0.9 * 14) = 13, minus 5 positives
    assert_eq!(second.budget, 8);
    assert_eq!(second.promoted + second.demoted, 1);

    let bag = &data.bags[6];
    assert!(bag.unknown.is_empty());
    assert!(bag.positive.contains(&b) || bag.negative.contains(&b));
}

#[test]
fn unknown_labels_survive_when_relabeling_is_off() {
    let mut data = dataset_with_unknown();
    let b = data.labels.id_of("B").unwrap();
    let config = ExtractorConfig {
        epochs: 3,
        relabel: false,
        ..common::config()
    };
    let outcome = JointBayesTrainer::new(config, 2).unwrap().train(&mut data).unwrap();
    assert!(outcome.relabeled.iter().all(Option::is_none));
    assert!(data.bags[6].unknown.contains(&b));
    assert!(!data.bags[6].positive.contains(&b));
}

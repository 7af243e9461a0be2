//! Expectation-maximisation over latent sentence labels.
//!
//! The trainer alternates an E-step (infer each bag's sentence labels under
//! the current sentence and bag classifiers) with an M-step (refit both
//! classifier families on the inferred labels). Sentence classifiers are
//! cross-validated: a bag's sentences are always scored by the fold model that
//! never trained on it.

pub mod inference;
pub mod relabel;
pub mod stats;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use indexmap::IndexMap;
use ndarray::Array1;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::{
    classify::{argmax, assert_distribution, train, Datum, LinearClassifier},
    config::ExtractorConfig,
    data::{
        folds::{fold_of, fold_range, train_indices},
        Bag, Dataset, ZLabelSpace,
    },
    error::{MimlError, Result},
    model::{JointModel, YFeatureExtractor, YFeatures, YModel},
};

pub use inference::{
    by_name, fixed_log_probs, BagProblem, HillClimbing, InferenceOutcome, JointScorer,
    LatentInference, StablePass,
};
pub use relabel::{relabel, RelabelOutcome};
pub use stats::{ConfusionMatrix, PrecisionRecall, SentenceStatistics, TrainingStatistics};

const CANDIDATE_STREAM: u64 = 0x5851_F42D_4C95_7F2D;

/// Where the trainer is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmState {
    Initializing,
    EStep,
    MStep,
    /// An E-step changed no sentence label.
    Converged,
    MaxEpochsReached,
    /// Bag classifiers disabled; stopped after the initial fold models.
    LocalOnly,
}

impl EmState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EmState::Converged | EmState::MaxEpochsReached | EmState::LocalOnly
        )
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: JointModel,
    pub state: EmState,
    /// Number of E-steps executed.
    pub epochs_run: usize,
    pub flips_per_epoch: Vec<usize>,
    /// Old → new label transitions of each E-step.
    pub transitions: Vec<ConfusionMatrix>,
    /// Bag-label relabeling of each E-step; `None` where it did not run.
    pub relabeled: Vec<Option<RelabelOutcome>>,
    /// Held-out quality of the initial fold classifiers.
    pub initial_evaluation: PrecisionRecall,
    pub statistics: TrainingStatistics,
    /// Final sentence labels, aligned with the (shuffled) dataset bags.
    pub z_labels: Vec<Vec<usize>>,
}

/// Result of one E-step.
struct EpochReport {
    flips: usize,
    confusion: ConfusionMatrix,
    statistics: TrainingStatistics,
    relabeled: Option<RelabelOutcome>,
}

/// Joint Bayes trainer bound to one configuration and a private worker pool.
pub struct JointBayesTrainer {
    config: ExtractorConfig,
    inference: Box<dyn LatentInference>,
    pool: ThreadPool,
    model_path: Option<PathBuf>,
}

impl JointBayesTrainer {
    /// Validate `config` and size the worker pool for `threads` shared by the ensemble.
    pub fn new(config: ExtractorConfig, threads: usize) -> Result<Self> {
        config.validate()?;
        let inference = inference::by_name(&config.inference)?;
        let workers = config.threads_per_model(threads);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("miml-em-{i}"))
            .build()?;
        info!(
            workers,
            inference = inference.name(),
            folds = config.folds,
            epochs = config.epochs,
            "created joint trainer"
        );
        Ok(Self {
            config,
            inference,
            pool,
            model_path: None,
        })
    }

    /// Write per-epoch checkpoints next to `path`.
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Run initialisation and EM to a terminal state. Bags are shuffled and
    /// relabeled in place.
    pub fn train(&self, dataset: &mut Dataset) -> Result<TrainingOutcome> {
        self.pool.install(|| self.run(dataset))
    }

    fn run(&self, dataset: &mut Dataset) -> Result<TrainingOutcome> {
        let config = &self.config;
        let mut state = EmState::Initializing;

        dataset.drop_empty_bags();
        dataset.apply_feature_count_threshold(config.feature_count_threshold);
        dataset.features.freeze();
        dataset.labels.freeze();
        dataset.check_consistency();

        let n = dataset.len();
        if n / config.folds == 0 {
            return Err(MimlError::config(format!(
                "cannot split {n} bags into {} folds",
                config.folds
            )));
        }
        if dataset.labels.is_empty() {
            return Err(MimlError::config("dataset declares no relation labels"));
        }

        let dependencies = dataset.known_dependencies();
        let extractor = YFeatureExtractor::new(
            config.y_features.iter().copied(),
            dataset.labels.iter().map(str::to_string).collect(),
            dependencies.clone(),
        );
        info!(
            state = ?state,
            bags = n,
            features = dataset.features.len(),
            relations = dataset.labels.len(),
            dependencies = dependencies.len(),
            labelled = dataset.labelled_pairs(),
            positives = dataset.positive_pairs(),
            "initialising"
        );

        let (mut z_classifiers, initial_evaluation) = self.initial_z_models(dataset)?;
        let mut z_labels = initial_z_labels(dataset, &z_classifiers, config.folds);
        let mut y_models: IndexMap<String, YModel> = dataset
            .labels
            .iter()
            .map(|name| (name.to_string(), YModel::at_least_once()))
            .collect();
        let mut merged_z: Option<LinearClassifier> = None;

        if !config.train_y {
            let local = self.local_log_probs(dataset, &z_classifiers);
            let names = dataset.z_space().names(&dataset.labels);
            let statistics = collect_statistics(0, &dataset.bags, &local, &z_labels, &names);
            transition(&mut state, EmState::LocalOnly, 0);
            return Ok(TrainingOutcome {
                model: self.snapshot(dataset, &z_classifiers, None, &y_models, &dependencies),
                state,
                epochs_run: 0,
                flips_per_epoch: Vec::new(),
                transitions: Vec::new(),
                relabeled: Vec::new(),
                initial_evaluation,
                statistics,
                z_labels,
            });
        }

        let mut flips_per_epoch = Vec::with_capacity(config.epochs);
        let mut transitions = Vec::with_capacity(config.epochs);
        let mut relabeled = Vec::with_capacity(config.epochs);
        let mut statistics = TrainingStatistics::default();

        for epoch in 0..config.epochs {
            transition(&mut state, EmState::EStep, epoch);
            let report = self.e_step(epoch, dataset, &mut z_labels, &z_classifiers, &y_models, &extractor);
            info!(
                epoch,
                flips = report.flips,
                changed = report.confusion.changed(),
                promoted = report.relabeled.map(|r| r.promoted),
                "finished E-step"
            );
            debug!(epoch, "label transitions:\n{}", report.confusion);
            flips_per_epoch.push(report.flips);
            transitions.push(report.confusion);
            relabeled.push(report.relabeled);
            statistics = report.statistics;

            if report.flips == 0 {
                transition(&mut state, EmState::Converged, epoch);
                break;
            }

            transition(&mut state, EmState::MStep, epoch);
            z_classifiers = self.train_z_folds(epoch, dataset, &z_labels)?;
            y_models = self.train_y_models(epoch, dataset, &z_labels, &extractor)?;
            if config.merged_z {
                merged_z = Some(self.train_merged(epoch, dataset, &z_labels));
            }
            if self.model_path.is_some() {
                let model =
                    self.snapshot(dataset, &z_classifiers, merged_z.as_ref(), &y_models, &dependencies);
                self.checkpoint(epoch, &model);
            }
        }
        if !state.is_terminal() {
            transition(&mut state, EmState::MaxEpochsReached, config.epochs);
        }

        Ok(TrainingOutcome {
            model: self.snapshot(dataset, &z_classifiers, merged_z.as_ref(), &y_models, &dependencies),
            state,
            epochs_run: flips_per_epoch.len(),
            flips_per_epoch,
            transitions,
            relabeled,
            initial_evaluation,
            statistics,
            z_labels,
        })
    }

    /// Fold classifiers from the cache when compatible, otherwise trained
    /// concurrently on the locally filtered bags.
    fn initial_z_models(&self, dataset: &Dataset) -> Result<(Vec<LinearClassifier>, PrecisionRecall)> {
        let folds = self.config.folds;
        if let Some(path) = self.config.initial_model.as_deref().filter(|p| p.exists()) {
            match JointModel::load(path) {
                Ok(model) if model.is_compatible(&dataset.features, &dataset.labels, folds) => {
                    info!(path = %path.display(), "reusing cached initial classifiers");
                    let evaluation = evaluate_folds(dataset, &model.z_classifiers, folds);
                    return Ok((model.z_classifiers, evaluation));
                }
                Ok(_) => warn!(path = %path.display(), "cached initial model is incompatible; retraining"),
                Err(err) => warn!(path = %path.display(), error = %err, "cannot read cached initial model; retraining"),
            }
        }

        let classifiers = (0..folds)
            .into_par_iter()
            .map(|fold| {
                self.train_initial_fold(fold, dataset)
                    .map_err(|err| err.in_worker(fold, 0))
            })
            .collect::<Result<Vec<_>>>()?;
        let evaluation = evaluate_folds(dataset, &classifiers, folds);

        if let Some(path) = &self.config.initial_model {
            let y_models: IndexMap<String, YModel> = dataset
                .labels
                .iter()
                .map(|name| (name.to_string(), YModel::at_least_once()))
                .collect();
            let model = self.snapshot(dataset, &classifiers, None, &y_models, &BTreeSet::new());
            if let Err(err) = model.save(path) {
                warn!(path = %path.display(), error = %err, "failed to cache initial classifiers");
            }
        }
        Ok((classifiers, evaluation))
    }

    fn train_initial_fold(&self, fold: usize, dataset: &Dataset) -> Result<LinearClassifier> {
        let space = dataset.z_space();
        let datums: Vec<Datum> = train_indices(fold, dataset.len(), self.config.folds)
            .into_iter()
            .map(|i| &dataset.bags[i])
            .filter(|bag| self.config.local_filter.accepts(bag))
            .flat_map(|bag| initial_examples(bag, space))
            .collect();
        if datums.is_empty() {
            return Err(MimlError::config(format!(
                "local filter {:?} left fold {fold} without training sentences",
                self.config.local_filter
            )));
        }
        let trainer = self.config.z_trainer(derive_seed(self.config.seed, 0, fold));
        Ok(train(&datums, dataset.features.len(), space.len(), &trainer))
    }

    /// Per-sentence Z log-probabilities, each bag scored by its own fold's
    /// classifier; annotated sentences get the fixed gold distribution.
    fn local_log_probs(
        &self,
        dataset: &Dataset,
        z_classifiers: &[LinearClassifier],
    ) -> Vec<Vec<Array1<f64>>> {
        let (n, folds) = (dataset.len(), self.config.folds);
        let space = dataset.z_space();
        dataset
            .bags
            .par_iter()
            .enumerate()
            .map(|(i, bag)| bag_log_probs(bag, &z_classifiers[fold_of(i, n, folds)], space))
            .collect()
    }

    fn e_step(
        &self,
        epoch: usize,
        dataset: &mut Dataset,
        z_labels: &mut [Vec<usize>],
        z_classifiers: &[LinearClassifier],
        y_models: &IndexMap<String, YModel>,
        extractor: &YFeatureExtractor,
    ) -> EpochReport {
        let config = &self.config;
        let (n, folds) = (dataset.len(), config.folds);
        let space = dataset.z_space();

        if !config.squash_randomization {
            dataset
                .bags
                .par_iter_mut()
                .zip(z_labels.par_iter_mut())
                .enumerate()
                .for_each(|(i, (bag, z))| {
                    let mut rng = StdRng::seed_from_u64(derive_seed(config.seed, epoch, i));
                    bag.shuffle_with(z, &mut rng);
                });
        }
        let local = self.local_log_probs(dataset, z_classifiers);

        let scorer = JointScorer::new(extractor, y_models);
        let relabeled = (epoch > 0 && config.relabel)
            .then(|| relabel(&mut dataset.bags, &local, &scorer, config.relabel_fraction));

        let flips = AtomicUsize::new(0);
        let names = space.names(&dataset.labels);
        let mut confusion = ConfusionMatrix::new(names.clone());
        for fold in 0..folds {
            let range = fold_range(fold, n, folds);
            let start = range.start;
            let changes: Vec<Vec<(usize, usize)>> = dataset.bags[range.clone()]
                .par_iter()
                .zip(z_labels[range.clone()].par_iter_mut())
                .zip(local[range].par_iter())
                .enumerate()
                .map(|(offset, ((bag, z), bag_local))| {
                    let mut candidates: Vec<usize> = (0..space.len()).collect();
                    if !config.squash_randomization {
                        let seed = derive_seed(config.seed ^ CANDIDATE_STREAM, epoch, start + offset);
                        candidates.shuffle(&mut StdRng::seed_from_u64(seed));
                    }
                    let fixed: Vec<Option<usize>> = bag
                        .fixed
                        .iter()
                        .map(|gold| gold.map(|g| g.to_z(space)))
                        .collect();
                    let before = z.clone();
                    let outcome = self.inference.infer(BagProblem {
                        local: bag_local,
                        fixed: &fixed,
                        positive: &bag.positive,
                        negative: &bag.negative,
                        candidates: &candidates,
                        scorer: &scorer,
                        z: z.as_mut_slice(),
                    });
                    flips.fetch_add(outcome.flips, Ordering::Relaxed);
                    before.into_iter().zip(z.iter().copied()).collect()
                })
                .collect();
            for (from, to) in changes.into_iter().flatten() {
                confusion.record(from, to);
            }
            debug!(epoch, fold, "fold inference joined");
        }

        for (bag, z) in dataset.bags.iter().zip(z_labels.iter()) {
            assert_eq!(bag.len(), z.len(), "bag {:?}: Z labels out of step", bag.key());
        }
        let statistics = collect_statistics(epoch, &dataset.bags, &local, z_labels, &names);
        EpochReport {
            flips: flips.into_inner(),
            confusion,
            statistics,
            relabeled,
        }
    }

    fn train_z_folds(
        &self,
        epoch: usize,
        dataset: &Dataset,
        z_labels: &[Vec<usize>],
    ) -> Result<Vec<LinearClassifier>> {
        let (n, folds) = (dataset.len(), self.config.folds);
        let labels = dataset.z_space().len();
        (0..folds)
            .into_par_iter()
            .map(|fold| {
                let datums: Vec<Datum> = train_indices(fold, n, folds)
                    .into_iter()
                    .flat_map(|i| labelled_examples(&dataset.bags[i], &z_labels[i]))
                    .collect();
                if datums.is_empty() {
                    return Err(MimlError::config(format!("fold {fold} has no training sentences"))
                        .in_worker(fold, epoch));
                }
                let trainer = self.config.z_trainer(derive_seed(self.config.seed, epoch + 1, fold));
                Ok(train(&datums, dataset.features.len(), labels, &trainer))
            })
            .collect()
    }

    fn train_y_models(
        &self,
        epoch: usize,
        dataset: &Dataset,
        z_labels: &[Vec<usize>],
        extractor: &YFeatureExtractor,
    ) -> Result<IndexMap<String, YModel>> {
        let names: Vec<&str> = dataset.labels.iter().collect();
        let fitted = names
            .par_iter()
            .enumerate()
            .map(|(relation, &name)| {
                let rows: Vec<(YFeatures, bool)> = dataset
                    .bags
                    .iter()
                    .zip(z_labels)
                    .filter_map(|(bag, z)| {
                        let holds = if bag.positive.contains(&relation) {
                            true
                        } else if self.config.all_negatives || bag.negative.contains(&relation) {
                            false
                        } else {
                            return None;
                        };
                        Some((extractor.extract(relation, z), holds))
                    })
                    .collect();
                YModel::fit(name, &rows, self.config.y_fit(), epoch)
                    .map(|model| (name.to_string(), model))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(fitted.into_iter().collect())
    }

    fn train_merged(&self, epoch: usize, dataset: &Dataset, z_labels: &[Vec<usize>]) -> LinearClassifier {
        let datums: Vec<Datum> = dataset
            .bags
            .iter()
            .zip(z_labels)
            .flat_map(|(bag, z)| labelled_examples(bag, z))
            .collect();
        let trainer = self
            .config
            .z_trainer(derive_seed(self.config.seed, epoch + 1, self.config.folds));
        train(&datums, dataset.features.len(), dataset.z_space().len(), &trainer)
    }

    fn snapshot(
        &self,
        dataset: &Dataset,
        z_classifiers: &[LinearClassifier],
        merged_z: Option<&LinearClassifier>,
        y_models: &IndexMap<String, YModel>,
        dependencies: &BTreeSet<(usize, usize)>,
    ) -> JointModel {
        JointModel {
            labels: dataset.labels.clone(),
            features: dataset.features.clone(),
            z_classifiers: z_classifiers.to_vec(),
            merged_z: merged_z.cloned(),
            y_models: y_models.clone(),
            dependencies: dependencies.clone(),
            y_features: self.config.y_features.clone(),
        }
    }

    fn checkpoint(&self, epoch: usize, model: &JointModel) {
        let Some(base) = &self.model_path else {
            return;
        };
        let path = checkpoint_path(base, epoch);
        if let Err(err) = model.save(&path) {
            warn!(epoch, path = %path.display(), error = %err, "checkpoint failed; continuing");
        }
    }
}

/// `<model>.epoch<N>`.
pub fn checkpoint_path(model: &Path, epoch: usize) -> PathBuf {
    let mut name = model.as_os_str().to_owned();
    name.push(format!(".epoch{epoch}"));
    PathBuf::from(name)
}

fn transition(state: &mut EmState, next: EmState, epoch: usize) {
    debug!(epoch, from = ?*state, to = ?next, "state transition");
    if next.is_terminal() {
        info!(epoch, state = ?next, "training finished");
    }
    *state = next;
}

fn derive_seed(base: u64, epoch: usize, index: usize) -> u64 {
    base.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (epoch as u64 + 1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ (index as u64 + 1).wrapping_mul(0x1656_67B1_9E37_79F9)
}

/// Pre-EM examples: gold labels win, otherwise one example per positive
/// relation weighted `1/|positive|`, or "unrelated" for bags without one.
fn initial_examples(bag: &Bag, space: ZLabelSpace) -> Vec<Datum> {
    let weight = 1.0 / bag.positive.len().max(1) as f64;
    let mut datums = Vec::with_capacity(bag.len() * bag.positive.len().max(1));
    for (sentence, fixed) in bag.sentences.iter().zip(&bag.fixed) {
        match fixed {
            Some(gold) => datums.push(Datum::new(sentence.clone(), gold.to_z(space), 1.0)),
            None if bag.positive.is_empty() => {
                datums.push(Datum::new(sentence.clone(), space.nil(), 1.0))
            }
            None => datums.extend(
                bag.positive
                    .iter()
                    .map(|&y| Datum::new(sentence.clone(), y, weight)),
            ),
        }
    }
    datums
}

fn labelled_examples<'a>(bag: &'a Bag, z: &'a [usize]) -> impl Iterator<Item = Datum> + 'a {
    bag.sentences
        .iter()
        .zip(z)
        .map(|(sentence, &label)| Datum::new(sentence.clone(), label, 1.0))
}

fn bag_log_probs(bag: &Bag, classifier: &LinearClassifier, space: ZLabelSpace) -> Vec<Array1<f64>> {
    bag.sentences
        .iter()
        .zip(&bag.fixed)
        .map(|(sentence, fixed)| match fixed {
            Some(gold) => fixed_log_probs(gold.to_z(space), space.len()),
            None => classifier.log_probabilities(sentence),
        })
        .collect()
}

/// Starting labels: gold where annotated, otherwise the locally most likely
/// of the bag's positive relations and "unrelated".
fn initial_z_labels(dataset: &Dataset, z_classifiers: &[LinearClassifier], folds: usize) -> Vec<Vec<usize>> {
    let n = dataset.len();
    let space = dataset.z_space();
    dataset
        .bags
        .iter()
        .enumerate()
        .map(|(i, bag)| {
            let local = bag_log_probs(bag, &z_classifiers[fold_of(i, n, folds)], space);
            let allowed: Vec<usize> = bag
                .positive
                .iter()
                .copied()
                .chain(std::iter::once(space.nil()))
                .collect();
            bag.fixed
                .iter()
                .zip(&local)
                .map(|(fixed, log_probs)| match fixed {
                    Some(gold) => gold.to_z(space),
                    None => allowed
                        .iter()
                        .copied()
                        .fold(space.nil(), |best, z| {
                            if log_probs[z] > log_probs[best] {
                                z
                            } else {
                                best
                            }
                        }),
                })
                .collect()
        })
        .collect()
}

/// Held-out precision/recall of each fold classifier on its own test bags.
fn evaluate_folds(dataset: &Dataset, z_classifiers: &[LinearClassifier], folds: usize) -> PrecisionRecall {
    let space = dataset.z_space();
    let mut total = PrecisionRecall::default();
    for (fold, classifier) in z_classifiers.iter().enumerate() {
        let mut counts = PrecisionRecall::default();
        for bag in &dataset.bags[fold_range(fold, dataset.len(), folds)] {
            for (sentence, fixed) in bag.sentences.iter().zip(&bag.fixed) {
                let gold: BTreeSet<usize> = match fixed {
                    Some(gold) => std::iter::once(gold.to_z(space)).collect(),
                    None => bag.positive.clone(),
                };
                let predicted = argmax(&classifier.log_probabilities(sentence));
                if gold.iter().any(|&z| space.is_relation(z)) {
                    counts.relevant += 1;
                }
                if space.is_relation(predicted) {
                    counts.predicted += 1;
                    if gold.contains(&predicted) {
                        counts.correct += 1;
                    }
                }
            }
        }
        info!(
            fold,
            precision = counts.precision(),
            recall = counts.recall(),
            f1 = counts.f1(),
            "held-out local evaluation"
        );
        total.merge(counts);
    }
    info!(%total, "initial sentence classifiers");
    total
}

fn collect_statistics(
    epoch: usize,
    bags: &[Bag],
    local: &[Vec<Array1<f64>>],
    z_labels: &[Vec<usize>],
    names: &[String],
) -> TrainingStatistics {
    let mut statistics = TrainingStatistics {
        epoch,
        ..TrainingStatistics::default()
    };
    for ((bag, bag_local), z) in bags.iter().zip(local).zip(z_labels) {
        for ((id, log_probs), &label) in bag.sentence_ids.iter().zip(bag_local).zip(z) {
            let probs = log_probs.mapv(f64::exp);
            assert_distribution(&probs);
            statistics.record(
                id,
                SentenceStatistics {
                    label: names[label].clone(),
                    distribution: names.iter().cloned().zip(probs.iter().copied()).collect(),
                    confidence: probs[label],
                },
            );
        }
    }
    statistics
}

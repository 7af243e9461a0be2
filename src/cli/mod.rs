//! Command-line interface wiring for miml-re.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use miml_re::{config::Settings, model::OutputMode};

pub mod classify;
pub mod inspect;
pub mod train;

/// Top-level CLI definition.
#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-instance multi-label relation extraction", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv); ignored when RUST_LOG is set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Dispatch the selected sub-command.
    pub async fn dispatch(self, settings: Settings) -> Result<()> {
        match self.command {
            Commands::Train(args) => train::run(args, settings).await,
            Commands::Classify(args) => classify::run(args, settings).await,
            Commands::Inspect(args) => inspect::run(args, settings).await,
        }
    }
}

/// Supported sub-commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Train sentence and bag classifiers with EM over a JSONL bag file.
    Train(train::Args),
    /// Score every relation for each bag of a JSONL file.
    Classify(classify::Args),
    /// Summarise a trained model.
    Inspect(inspect::Args),
}

/// Bag scoring rule exposed on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    /// Bag classifier applied to the most likely sentence labels.
    JointBayes,
    /// Noisy-or over every sentence's local probability.
    NoisyOr,
    /// Noisy-or over sentences whose top label is the relation.
    ThresholdNoisyOr,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::JointBayes => OutputMode::JointBayes,
            ModeArg::NoisyOr => OutputMode::NoisyOr,
            ModeArg::ThresholdNoisyOr => OutputMode::ThresholdNoisyOr,
        }
    }
}

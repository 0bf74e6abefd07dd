use std::fmt;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::real;

#[derive(Parser)]
#[command(about = "word embedding training toolkit", long_about = None, version = "0.1")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Train word embeddings with the skip-gram model
    Skipgram(TrainArgs),

    /// Train word embeddings with the subword (character n-gram) model
    Subword(TrainArgs),

    /// Train Chinese character embeddings with the sub-character model
    SubcharChinese(TrainArgs),

    /// Train Chinese character embeddings with the sub-radical model
    Subradical(TrainArgs),
}

impl Command {
    pub fn into_config(self) -> Config {
        let (objective, args) = match self {
            Command::Skipgram(args) => (Objective::Skipgram, args),
            Command::Subword(args) => (Objective::Subword, args),
            Command::SubcharChinese(args) => (Objective::SubcharChinese, args),
            Command::Subradical(args) => (Objective::Subradical, args),
        };
        Config {
            objective,
            input: args.input,
            output: args.output,
            dim: args.dim,
            lr: args.lr,
            window: args.window,
            epoch: args.epoch,
            min_count: args.min_count,
            neg: args.neg,
            loss: args.loss,
            bucket: args.bucket,
            minn: args.minn,
            maxn: args.maxn,
            sample: args.sample,
            threads: args.threads,
            lr_update_rate: args.lr_update_rate,
            verbose: args.verbose,
        }
    }
}

#[derive(Args)]
pub struct TrainArgs {
    /// Train on text data from FILE
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Write vectors to FILE.source and FILE.target
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Size of word vectors
    #[arg(long, default_value_t = 100)]
    dim: usize,

    /// Starting learning rate
    #[arg(long, default_value_t = 0.05)]
    lr: real,

    /// Max size of the context window
    #[arg(long = "ws", default_value_t = 5)]
    window: usize,

    /// Number of passes over the training token budget
    #[arg(long, default_value_t = 5)]
    epoch: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Number of negative examples sampled per target
    #[arg(long, default_value_t = 5)]
    neg: usize,

    /// Loss function
    #[arg(long, value_enum, default_value_t = LossKind::Ns)]
    loss: LossKind,

    /// Number of hash buckets for character n-grams (subword model)
    #[arg(long, default_value_t = 2_000_000)]
    bucket: usize,

    /// Min length of character n-grams (subword model)
    #[arg(long, default_value_t = 3)]
    minn: usize,

    /// Max length of character n-grams (subword model)
    #[arg(long, default_value_t = 6)]
    maxn: usize,

    /// Subsampling threshold for frequent words
    #[arg(long = "t", default_value_t = 1e-4)]
    sample: real,

    /// Use N threads
    #[arg(long = "thread", value_name = "N", default_value_t = 12)]
    threads: usize,

    /// Tokens each thread processes between flushes of its count
    /// into the shared total
    #[arg(long = "lr-update-rate", value_name = "N", default_value_t = 100)]
    lr_update_rate: u64,

    /// Verbosity level (0 = silent, 1 = final report, 2 = live progress)
    #[arg(long, default_value_t = 2)]
    verbose: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Objective {
    Skipgram,
    Subword,
    SubcharChinese,
    Subradical,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Objective::Skipgram => "skipgram",
            Objective::Subword => "subword",
            Objective::SubcharChinese => "subchar_chinese",
            Objective::Subradical => "subradical",
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum LossKind {
    /// Negative sampling
    Ns,
    /// Hierarchical softmax
    Hs,
}

// clap needs Display for `default_value_t`.
impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LossKind::Ns => "ns",
            LossKind::Hs => "hs",
        })
    }
}

/// Everything a training run needs to know. Assembled from the CLI by
/// `Command::into_config`; tests build one directly.
pub struct Config {
    pub objective: Objective,
    pub input: PathBuf,
    pub output: PathBuf,
    pub dim: usize,
    pub lr: real,
    pub window: usize,
    pub epoch: usize,
    pub min_count: u64,
    pub neg: usize,
    pub loss: LossKind,
    pub bucket: usize,
    pub minn: usize,
    pub maxn: usize,
    pub sample: real,
    pub threads: usize,
    pub lr_update_rate: u64,
    pub verbose: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            objective: Objective::Skipgram,
            input: PathBuf::new(),
            output: PathBuf::new(),
            dim: 100,
            lr: 0.05,
            window: 5,
            epoch: 5,
            min_count: 5,
            neg: 5,
            loss: LossKind::Ns,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            sample: 1e-4,
            threads: 12,
            lr_update_rate: 100,
            verbose: 2,
        }
    }
}

//! The concurrent training loop: orchestrator, worker threads, context
//! sampling and the progress monitor.
//!
//! All workers share the two embedding matrices and update them without
//! locks; the only synchronized state is `TrainingState` (token counter
//! and loss estimate, both relaxed atomics). Reads of either may be stale,
//! which makes every progress report approximate by design.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::config::{Config, Objective};
use crate::dictionary::{seek_past_line, Dictionary, TrainingLine};
use crate::matrix::{Matrix, Real, Vector};
use crate::model::Model;
use crate::{real, Rng};

const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// The annealed rate never drops below this fraction of the base rate.
const LR_FLOOR: real = 1e-4;

/// Progress state shared by every worker and the monitor for the duration
/// of one run. Created at train start, dropped at train end.
pub struct TrainingState {
    tokens: AtomicU64,
    loss: Real,
    start: Instant,
}

impl TrainingState {
    fn new() -> TrainingState {
        let state = TrainingState {
            tokens: AtomicU64::new(0),
            loss: Real::default(),
            start: Instant::now(),
        };
        // negative sentinel: no loss estimate published yet
        state.loss.set(-1.0);
        state
    }

    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    fn add_tokens(&self, n: u64) {
        self.tokens.fetch_add(n, Ordering::Relaxed);
    }

    pub fn loss(&self) -> real {
        self.loss.get()
    }

    fn set_loss(&self, loss: real) {
        self.loss.set(loss);
    }
}

/// Linear annealing with an inclusive floor at `LR_FLOOR * base`.
pub fn annealed_lr(base: real, progress: real) -> real {
    (base * (1.0 - progress)).max(LR_FLOOR * base)
}

/// Generate skip-gram training pairs for one line, driving `update` once
/// per pair. Every position draws a fresh window half-width from
/// `[1, window]`, biasing the effective context toward nearby words.
pub fn sample_context(
    rng: &mut Rng,
    window: usize,
    line: &TrainingLine,
    mut update: impl FnMut(&[u32], u32),
) {
    let len = line.target.len() as isize;
    for w in 0..line.target.len() {
        let boundary = rng.rand_range(1, window) as isize;
        for c in -boundary..=boundary {
            let pos = w as isize + c;
            if c != 0 && pos >= 0 && pos < len {
                update(&line.source[w], line.target[pos as usize]);
            }
        }
    }
}

pub struct Trainer {
    config: Config,
    dict: Dictionary,
    input: Matrix,
    output: Matrix,
}

impl Trainer {
    /// Build the vocabulary and allocate the shared matrices. Every fatal
    /// configuration check happens here, before any thread is spawned.
    pub fn new(config: Config) -> Result<Trainer> {
        if config.input.as_os_str() == "-" {
            bail!("cannot use stdin for training");
        }
        if config.threads == 0 {
            bail!("at least one training thread is required");
        }
        if config.window == 0 {
            bail!("the context window must be at least 1");
        }
        match config.objective {
            Objective::SubcharChinese | Objective::Subradical => bail!(
                "the {} objective needs a sub-character feature table, \
                 which this build does not include",
                config.objective
            ),
            Objective::Skipgram | Objective::Subword => {}
        }
        let file = File::open(&config.input).with_context(|| {
            format!("{} cannot be opened for training", config.input.display())
        })?;

        let mut dict = Dictionary::new(&config);
        dict.read_from_file(BufReader::new(file))?;

        let input = Matrix::new(dict.input_size(), config.dim);
        input.uniform(1.0 / config.dim as real, &mut Rng::new(1));
        let output = Matrix::new(dict.ntargets(), config.dim);
        output.zero();

        Ok(Trainer {
            config,
            dict,
            input,
            output,
        })
    }

    /// Run the worker pool to completion. The calling thread doubles as
    /// the progress monitor, polling the shared counters on a fixed
    /// interval; workers are joined before this returns.
    pub fn train(&self) -> Result<()> {
        let state = TrainingState::new();
        let budget = self.config.epoch as u64 * self.dict.ntokens();

        thread::scope(|scope| -> Result<()> {
            let state = &state;
            let workers: Vec<_> = (0..self.config.threads)
                .map(|id| scope.spawn(move || self.worker(state, id)))
                .collect();

            // Same stopping condition the workers check. Reports are
            // rendered only once a worker has published a loss estimate.
            while state.tokens() < budget {
                thread::sleep(MONITOR_INTERVAL);
                // workers that all stopped early (an I/O failure, say)
                // can never reach the budget; stop polling and surface
                // their error below
                if workers.iter().all(|w| w.is_finished()) {
                    break;
                }
                let loss = state.loss();
                if loss >= 0.0 && self.config.verbose > 1 {
                    let progress = (state.tokens() as real / budget as real).min(1.0);
                    let _ = self.print_progress(&mut io::stderr(), state, progress, loss);
                }
            }

            let mut result = Ok(());
            for worker in workers {
                let joined = worker.join().expect("worker thread panicked");
                if result.is_ok() {
                    result = joined;
                }
            }
            result
        })?;

        if self.config.verbose > 0 {
            let _ = self.print_progress(&mut io::stderr(), &state, 1.0, state.loss());
            eprintln!();
        }
        Ok(())
    }

    /// One worker thread: owns a corpus read handle positioned at its
    /// byte shard, a private model and generators, and a local token
    /// count flushed into the shared state every `lr_update_rate` tokens.
    fn worker(&self, state: &TrainingState, id: usize) -> Result<()> {
        let file = File::open(&self.config.input).with_context(|| {
            format!("{} cannot be opened for training", self.config.input.display())
        })?;
        let shard = id as u64 * file.metadata().context("error reading corpus size")?.len()
            / self.config.threads as u64;
        let mut reader = BufReader::new(file);
        seek_past_line(&mut reader, shard).context("error seeking to shard start")?;

        let mut rng = Rng::new(id as u64);
        let mut model = Model::new(&self.input, &self.output, &self.config, id as u64);
        model.set_target_counts(&self.dict.counts());

        let budget = self.config.epoch as u64 * self.dict.ntokens();
        let mut local = 0u64;
        let mut line = TrainingLine::default();
        // The stopping check races with other workers' flushes; a thread
        // may overshoot the budget by up to one flush interval. That
        // approximate-termination policy is intended.
        while state.tokens() < budget {
            let progress = state.tokens() as real / budget as real;
            let lr = annealed_lr(self.config.lr, progress);

            local += self.dict.get_line(&mut reader, &mut line, &mut rng)?;
            sample_context(&mut rng, self.config.window, &line, |source, target| {
                model.update(source, target, lr)
            });

            if local > self.config.lr_update_rate {
                state.add_tokens(local);
                local = 0;
                if id == 0 && self.config.verbose > 1 {
                    state.set_loss(model.loss());
                }
            }
        }
        if id == 0 {
            state.set_loss(model.loss());
        }
        Ok(())
    }

    /// Render one status report into `out`, `\r`-overwriting the
    /// previous one.
    fn print_progress(
        &self,
        out: &mut impl Write,
        state: &TrainingState,
        progress: real,
        loss: real,
    ) -> io::Result<()> {
        let elapsed = state.start.elapsed().as_secs_f64();
        let lr = self.config.lr * (1.0 - progress);
        let wst = if progress > 0.0 && elapsed > 0.0 {
            (state.tokens() as f64 / elapsed) as i64
        } else {
            0
        };
        write!(
            out,
            "\rProgress: {:5.1}% words/sec/thread: {:7} lr: {:9.6} loss: {:9.6}",
            progress * 100.0,
            wst,
            lr,
            loss
        )?;
        out.flush()
    }

    /// Write the `.source` and `.target` exports, one line per vocabulary
    /// entry, in index order. Each file is skipped when its vocabulary is
    /// empty; a failure on the second file leaves the first in place.
    pub fn save_vectors(&self) -> Result<()> {
        let nwords = self.dict.nwords();
        if nwords > 0 {
            let path = suffixed(&self.config.output, ".source");
            let mut out = BufWriter::new(File::create(&path).with_context(|| {
                format!(
                    "{} cannot be opened for saving source embeddings",
                    path.display()
                )
            })?);
            let mut vec = Vector::new(self.config.dim);
            for i in 0..nwords {
                vec.zero();
                vec.add_row(&self.input, i);
                writeln!(out, "{} {}", self.dict.word(i), vec)
                    .context("error writing source embeddings")?;
            }
        }

        let ntargets = self.dict.ntargets();
        if ntargets > 0 {
            let path = suffixed(&self.config.output, ".target");
            let mut out = BufWriter::new(File::create(&path).with_context(|| {
                format!(
                    "{} cannot be opened for saving target embeddings",
                    path.display()
                )
            })?);
            let mut vec = Vector::new(self.config.dim);
            for i in 0..ntargets {
                vec.zero();
                vec.add_row(&self.output, i);
                writeln!(out, "{} {}", self.dict.target(i), vec)
                    .context("error writing target embeddings")?;
            }
        }
        Ok(())
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annealing_is_linear_with_an_inclusive_floor() {
        assert_eq!(annealed_lr(0.05, 0.0), 0.05);
        assert_eq!(annealed_lr(0.05, 0.5), 0.025);
        // at progress 0.9999 the linear value equals the floor exactly
        let at_floor = annealed_lr(0.05, 0.9999);
        assert!((at_floor - 0.05 * 1e-4).abs() < 1e-8);
        // past that, the floor holds
        assert_eq!(annealed_lr(0.05, 1.0), 0.05 * 1e-4);
        assert_eq!(annealed_lr(0.05, 2.0), 0.05 * 1e-4);
    }

    #[test]
    fn annealing_never_increases_with_progress() {
        let mut prev = annealed_lr(0.05, 0.0);
        for i in 1..=1000 {
            let lr = annealed_lr(0.05, i as real / 1000.0);
            assert!(lr <= prev);
            prev = lr;
        }
    }

    fn line_of(ids: &[u32]) -> TrainingLine {
        TrainingLine {
            source: ids.iter().map(|&id| vec![id]).collect(),
            target: ids.to_vec(),
        }
    }

    #[test]
    fn window_one_yields_exactly_the_adjacent_pairs() {
        let line = line_of(&[0, 1, 2, 3]);
        let mut rng = Rng::new(0);
        let mut pairs = vec![];
        sample_context(&mut rng, 1, &line, |source, target| {
            pairs.push((source[0], target));
        });
        assert_eq!(
            pairs,
            vec![(0, 1), (1, 0), (1, 2), (2, 1), (2, 3), (3, 2)]
        );
    }

    #[test]
    fn sampled_pairs_stay_within_the_window() {
        let line = line_of(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let window = 3;
        let mut rng = Rng::new(42);
        for _ in 0..200 {
            let mut per_position = vec![0usize; 8];
            sample_context(&mut rng, window, &line, |source, target| {
                let w = source[0] as i64;
                let c = target as i64 - w;
                assert!(c != 0 && c.unsigned_abs() as usize <= window);
                per_position[w as usize] += 1;
            });
            for &n in &per_position {
                assert!(n <= 2 * window);
            }
        }
    }

    #[test]
    fn interior_position_update_counts_follow_the_boundary() {
        // target = [0,1,2,3], window 2: position 1 issues two updates for
        // boundary 1 and three for boundary 2 (offset -2 is out of bounds)
        let line = line_of(&[0, 1, 2, 3]);
        let mut rng = Rng::new(7);
        for _ in 0..200 {
            let mut from_one = vec![];
            sample_context(&mut rng, 2, &line, |source, target| {
                if source[0] == 1 {
                    from_one.push(target);
                }
            });
            match from_one.len() {
                2 => assert_eq!(from_one, vec![0, 2]),
                3 => assert_eq!(from_one, vec![0, 2, 3]),
                n => panic!("position 1 issued {n} updates"),
            }
        }
    }

    #[test]
    fn empty_line_issues_no_updates() {
        let line = TrainingLine::default();
        let mut rng = Rng::new(0);
        sample_context(&mut rng, 5, &line, |_, _| panic!("no pairs expected"));
    }

    fn scratch_trainer(name: &str) -> Trainer {
        let path = std::env::temp_dir().join(format!(
            "wordvec-unit-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, "a b a b\n").unwrap();
        let trainer = Trainer::new(Config {
            input: path.clone(),
            min_count: 1,
            verbose: 0,
            ..Config::default()
        })
        .unwrap();
        let _ = std::fs::remove_file(path);
        trainer
    }

    #[test]
    fn progress_reports_never_decrease_and_finish_at_one_hundred() {
        let trainer = scratch_trainer("progress");
        let state = TrainingState::new();
        state.add_tokens(4);

        // the monitor clamps overshoot before rendering, then forces a
        // final report at exactly 100%
        let mut out = vec![];
        for polled in [0.0f32, 0.4, 0.75, 1.2] {
            trainer
                .print_progress(&mut out, &state, polled.min(1.0), 0.5)
                .unwrap();
        }
        trainer.print_progress(&mut out, &state, 1.0, 0.5).unwrap();

        let text = String::from_utf8(out).unwrap();
        let reports: Vec<&str> = text.split('\r').filter(|r| !r.is_empty()).collect();
        assert_eq!(reports.len(), 5);
        let mut last = -1.0f32;
        for report in &reports {
            let field = report.split_whitespace().nth(1).unwrap();
            let pct: f32 = field.trim_end_matches('%').parse().unwrap();
            assert!(pct >= last, "progress went backwards: {report}");
            last = pct;
        }
        assert_eq!(last, 100.0);
        assert!(reports.last().unwrap().starts_with("Progress: 100.0%"));
    }

    #[test]
    fn training_state_starts_with_a_loss_sentinel() {
        let state = TrainingState::new();
        assert_eq!(state.tokens(), 0);
        assert!(state.loss() < 0.0);
        state.add_tokens(10);
        state.add_tokens(5);
        assert_eq!(state.tokens(), 15);
        state.set_loss(0.25);
        assert_eq!(state.loss(), 0.25);
    }

    #[test]
    fn suffixed_appends_to_the_full_name() {
        assert_eq!(
            suffixed(Path::new("out/vec"), ".source"),
            PathBuf::from("out/vec.source")
        );
    }
}

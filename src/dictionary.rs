//! Corpus vocabulary: token counting, frequency thresholding, subsampling,
//! and decoding of training lines for the worker threads.

use std::collections::HashMap;
use std::io::{self, BufRead, ErrorKind, Read, Seek, SeekFrom};

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use crate::config::{Config, Objective};
use crate::{real, Rng};

/// Positions per decoded line before the remainder is deferred to the
/// next `get_line` call.
pub const MAX_LINE_LEN: usize = 1024;

pub struct Entry {
    pub word: String,
    pub count: u64,
}

/// One corpus line decoded into parallel arrays: `source[w]` is the id
/// group predicting from position `w`, `target[w]` the word id at `w`.
#[derive(Default)]
pub struct TrainingLine {
    pub source: Vec<Vec<u32>>,
    pub target: Vec<u32>,
}

impl TrainingLine {
    fn clear(&mut self) {
        self.source.clear();
        self.target.clear();
    }
}

pub struct Dictionary {
    entries: Vec<Entry>,
    word2id: HashMap<String, u32>,
    /// Per-word source group: just the word id for skipgram, the word id
    /// plus its hashed character n-grams for subword.
    groups: Vec<Vec<u32>>,
    /// Subsampling keep-probabilities, indexed by word id.
    pdiscard: Vec<real>,
    ntokens: u64,

    objective: Objective,
    min_count: u64,
    sample: real,
    bucket: usize,
    minn: usize,
    maxn: usize,
    verbose: u32,
}

impl Dictionary {
    pub fn new(config: &Config) -> Dictionary {
        Dictionary {
            entries: vec![],
            word2id: HashMap::new(),
            groups: vec![],
            pdiscard: vec![],
            ntokens: 0,
            objective: config.objective,
            min_count: config.min_count,
            sample: config.sample,
            bucket: config.bucket,
            minn: config.minn,
            maxn: config.maxn,
            verbose: config.verbose,
        }
    }

    /// Count every token in the corpus and build the frequency-sorted
    /// vocabulary. Words seen fewer than `min_count` times are dropped
    /// but still contribute to `ntokens`.
    pub fn read_from_file(&mut self, reader: impl BufRead) -> Result<()> {
        let spinner = if self.verbose > 1 {
            Some(ProgressBar::new_spinner())
        } else {
            None
        };

        let mut counts: HashMap<String, u64> = HashMap::new();
        for word in read_words(reader) {
            let word = word.context("error reading training data")?;
            *counts.entry(word).or_insert(0) += 1;
            self.ntokens += 1;
            if self.ntokens % 1_000_000 == 0 {
                if let Some(pb) = &spinner {
                    pb.set_message(format!("read {}M tokens", self.ntokens / 1_000_000));
                    pb.tick();
                }
            }
        }
        if let Some(pb) = &spinner {
            pb.finish_and_clear();
        }

        self.entries = counts
            .into_iter()
            .filter(|&(_, count)| count >= self.min_count)
            .map(|(word, count)| Entry { word, count })
            .collect();
        // Descending by frequency; ties broken by the word itself so the
        // id assignment does not depend on hash iteration order.
        self.entries
            .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));

        self.word2id = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.word.clone(), i as u32))
            .collect();
        self.init_discard();
        self.init_groups();

        if self.verbose > 0 {
            println!("Read {} tokens", self.ntokens);
            println!("Vocab size: {}", self.nwords());
        }
        Ok(())
    }

    fn init_discard(&mut self) {
        self.pdiscard = self
            .entries
            .iter()
            .map(|e| {
                let f = e.count as real / self.ntokens as real;
                (self.sample / f).sqrt() + self.sample / f
            })
            .collect();
    }

    fn init_groups(&mut self) {
        let nwords = self.entries.len() as u32;
        self.groups = self
            .entries
            .iter()
            .enumerate()
            .map(|(id, e)| {
                let mut group = vec![id as u32];
                if self.objective == Objective::Subword {
                    push_subwords(
                        &mut group,
                        &e.word,
                        self.minn,
                        self.maxn,
                        nwords,
                        self.bucket,
                    );
                }
                group
            })
            .collect();
    }

    /// Total token count of the corpus, including words later dropped
    /// from the vocabulary. The training budget is `epoch * ntokens`.
    pub fn ntokens(&self) -> u64 {
        self.ntokens
    }

    pub fn nwords(&self) -> usize {
        self.entries.len()
    }

    pub fn ntargets(&self) -> usize {
        self.entries.len()
    }

    /// Number of rows the input embedding matrix needs: word rows first,
    /// then n-gram buckets for the subword objective.
    pub fn input_size(&self) -> usize {
        match self.objective {
            Objective::Subword => self.entries.len() + self.bucket,
            _ => self.entries.len(),
        }
    }

    pub fn counts(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.count).collect()
    }

    pub fn word(&self, id: usize) -> &str {
        &self.entries[id].word
    }

    pub fn target(&self, id: usize) -> &str {
        &self.entries[id].word
    }

    pub fn word_id(&self, word: &str) -> Option<u32> {
        self.word2id.get(word).copied()
    }

    /// Decode the next line from `reader` into `line`, returning the
    /// number of tokens consumed (out-of-vocabulary and subsampled words
    /// count toward the total but produce no position).
    ///
    /// At end of file the reader wraps to byte 0, so a worker whose token
    /// budget is not yet spent keeps reading from the top of the corpus.
    pub fn get_line<R: BufRead + Seek>(
        &self,
        reader: &mut R,
        line: &mut TrainingLine,
        rng: &mut Rng,
    ) -> Result<u64> {
        line.clear();
        let mut ntokens = 0u64;
        let mut wrapped = false;
        let mut word: Vec<u8> = vec![];
        loop {
            match read_byte(reader).context("error reading training data")? {
                None => {
                    self.accept(&mut word, &mut ntokens, line, rng);
                    reader
                        .seek(SeekFrom::Start(0))
                        .context("error rewinding training data")?;
                    // at most one wrap per call, so an empty corpus
                    // still yields an (empty) line
                    if ntokens == 0 && !wrapped {
                        wrapped = true;
                        continue;
                    }
                    break;
                }
                Some(b'\n') => {
                    self.accept(&mut word, &mut ntokens, line, rng);
                    break;
                }
                Some(b' ') | Some(b'\t') => self.accept(&mut word, &mut ntokens, line, rng),
                Some(b'\r') => {}
                Some(b) => word.push(b),
            }
            if line.target.len() >= MAX_LINE_LEN {
                break;
            }
        }
        Ok(ntokens)
    }

    fn accept(
        &self,
        word: &mut Vec<u8>,
        ntokens: &mut u64,
        line: &mut TrainingLine,
        rng: &mut Rng,
    ) {
        if word.is_empty() {
            return;
        }
        *ntokens += 1;
        if let Some(&id) = self.word2id.get(String::from_utf8_lossy(word).as_ref()) {
            if rng.rand_real() <= self.pdiscard[id as usize] {
                line.target.push(id);
                line.source.push(self.groups[id as usize].clone());
            }
        }
        word.clear();
    }
}

/// Seek to a byte offset, then advance to the next line start. A shard
/// boundary rarely lands on a line boundary; the partial line belongs to
/// the previous shard. Offset 0 is already a line start and skips nothing.
pub fn seek_past_line<R: BufRead + Seek>(reader: &mut R, offset: u64) -> io::Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    if offset > 0 {
        let mut skipped = vec![];
        reader.read_until(b'\n', &mut skipped)?;
    }
    Ok(())
}

fn read_byte<R: Read>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = 0;
    loop {
        return match reader.read(std::slice::from_mut(&mut byte)) {
            Ok(0) => Ok(None),
            Ok(..) => Ok(Some(byte)),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
    }
}

// Read words from the corpus, with space, tab and EOL as word boundaries.
fn read_words(reader: impl BufRead) -> impl Iterator<Item = Result<String, io::Error>> {
    let mut bytes = reader.bytes();
    let mut done = false;
    std::iter::from_fn(move || -> Option<Result<String, io::Error>> {
        if done {
            return None;
        }
        let mut word = Vec::<u8>::new();
        loop {
            match bytes.next() {
                None => {
                    done = true;
                    break;
                }
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(b'\r')) => {}
                Some(Ok(b' ')) | Some(Ok(b'\t')) | Some(Ok(b'\n')) => {
                    if !word.is_empty() {
                        break;
                    }
                }
                Some(Ok(b)) => word.push(b),
            }
        }
        if word.is_empty() {
            None
        } else {
            Some(Ok(String::from_utf8_lossy(&word).to_string()))
        }
    })
}

/// Hash the character n-grams of `<word>` into rows past the word rows,
/// FNV-1a into `bucket` buckets.
fn push_subwords(
    group: &mut Vec<u32>,
    word: &str,
    minn: usize,
    maxn: usize,
    nwords: u32,
    bucket: usize,
) {
    let decorated = format!("<{word}>");
    let bounds: Vec<usize> = decorated
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(decorated.len()))
        .collect();
    let nchars = bounds.len() - 1;
    for start in 0..nchars {
        for n in minn..=maxn {
            if start + n > nchars {
                break;
            }
            let ngram = &decorated[bounds[start]..bounds[start + n]];
            group.push(nwords + (fnv1a(ngram.as_bytes()) as usize % bucket) as u32);
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in bytes {
        h ^= b as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}

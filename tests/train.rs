//! End-to-end training runs over small scratch corpora.

use std::fs;
use std::path::PathBuf;

use wordvec::config::{Config, Objective};
use wordvec::trainer::Trainer;
use wordvec::Vectors;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wordvec-test-{}-{name}", std::process::id()))
}

fn write_corpus(name: &str) -> PathBuf {
    let path = scratch_path(name);
    let mut text = String::new();
    for i in 0..300 {
        text.push_str("the quick brown fox jumps over the lazy dog\n");
        if i % 3 == 0 {
            text.push_str("the dog sleeps while the fox runs\n");
        }
    }
    fs::write(&path, text).unwrap();
    path
}

fn small_config(corpus: PathBuf, output: PathBuf) -> Config {
    Config {
        input: corpus,
        output,
        dim: 10,
        epoch: 2,
        threads: 1,
        min_count: 1,
        neg: 3,
        window: 3,
        sample: 1.0, // keep every word
        verbose: 0,
        ..Config::default()
    }
}

#[test]
fn skipgram_training_writes_both_exports() {
    let corpus = write_corpus("exports.txt");
    let output = scratch_path("exports-vec");
    let config = small_config(corpus.clone(), output.clone());

    let trainer = Trainer::new(config).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    let source_path = scratch_path("exports-vec.source");
    let target_path = scratch_path("exports-vec.target");
    let source = fs::read_to_string(&source_path).unwrap();
    let target = fs::read_to_string(&target_path).unwrap();

    // 11 distinct words in the corpus, one line each, 1 + dim fields
    let source_lines: Vec<&str> = source.lines().collect();
    let target_lines: Vec<&str> = target.lines().collect();
    assert_eq!(source_lines.len(), 11);
    assert_eq!(target_lines.len(), 11);
    for line in source_lines.iter().chain(target_lines.iter()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields.len(), 1 + 10);
        for value in &fields[1..] {
            value.parse::<f32>().unwrap();
        }
    }
    // most frequent word comes first
    assert!(source.starts_with("the "));

    // the exports can be loaded back for querying
    let vectors = Vectors::load(&source_path).unwrap();
    assert_eq!(vectors.num_words(), 11);
    assert_eq!(vectors.size(), 10);
    assert!(vectors.lookup_word("fox").is_some());

    for path in [corpus, source_path, target_path] {
        let _ = fs::remove_file(path);
    }
}

#[test]
fn single_threaded_runs_are_bit_identical() {
    let corpus = write_corpus("determinism.txt");

    let out_a = scratch_path("det-a");
    let trainer = Trainer::new(small_config(corpus.clone(), out_a)).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    let out_b = scratch_path("det-b");
    let trainer = Trainer::new(small_config(corpus.clone(), out_b)).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    for ext in [".source", ".target"] {
        let a = fs::read(scratch_path(&format!("det-a{ext}"))).unwrap();
        let b = fs::read(scratch_path(&format!("det-b{ext}"))).unwrap();
        assert_eq!(a, b, "{ext} files differ between identical runs");
        let _ = fs::remove_file(scratch_path(&format!("det-a{ext}")));
        let _ = fs::remove_file(scratch_path(&format!("det-b{ext}")));
    }
    let _ = fs::remove_file(corpus);
}

#[test]
fn multi_threaded_training_terminates() {
    let corpus = write_corpus("threads.txt");
    let output = scratch_path("threads-vec");
    let config = Config {
        threads: 4,
        ..small_config(corpus.clone(), output)
    };

    let trainer = Trainer::new(config).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    for name in ["threads-vec.source", "threads-vec.target"] {
        let path = scratch_path(name);
        assert!(path.exists());
        let _ = fs::remove_file(path);
    }
    let _ = fs::remove_file(corpus);
}

#[test]
fn subword_training_runs_end_to_end() {
    let corpus = write_corpus("subword.txt");
    let output = scratch_path("subword-vec");
    let config = Config {
        objective: Objective::Subword,
        bucket: 5000,
        ..small_config(corpus.clone(), output)
    };

    let trainer = Trainer::new(config).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    // exports cover word rows only, never the n-gram buckets
    let source = fs::read_to_string(scratch_path("subword-vec.source")).unwrap();
    assert_eq!(source.lines().count(), 11);

    for name in ["subword-vec.source", "subword-vec.target"] {
        let _ = fs::remove_file(scratch_path(name));
    }
    let _ = fs::remove_file(corpus);
}

#[test]
fn single_word_vocabulary_trains_and_exports() {
    let path = scratch_path("oneword.txt");
    fs::write(&path, "hello hello hello hello\n".repeat(50)).unwrap();
    let config = small_config(path.clone(), scratch_path("oneword-vec"));

    // no valid negatives exist; training must still terminate
    let trainer = Trainer::new(config).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    let source = fs::read_to_string(scratch_path("oneword-vec.source")).unwrap();
    assert_eq!(source.lines().count(), 1);

    for name in ["oneword-vec.source", "oneword-vec.target"] {
        let _ = fs::remove_file(scratch_path(name));
    }
    let _ = fs::remove_file(path);
}

#[test]
fn corpus_vanishing_before_training_is_a_fatal_error() {
    let corpus = write_corpus("vanish.txt");
    let output = scratch_path("vanish-vec");
    let trainer = Trainer::new(small_config(corpus.clone(), output)).unwrap();

    // every worker fails to reopen the corpus; train() must report that
    // instead of polling forever
    fs::remove_file(&corpus).unwrap();
    let err = trainer.train().err().unwrap();
    assert!(err.to_string().contains("cannot be opened"));
}

#[test]
fn all_rare_words_means_no_exports() {
    let path = scratch_path("rare.txt");
    fs::write(&path, "each word appears only once here\n").unwrap();
    let output = scratch_path("rare-vec");
    let config = Config {
        min_count: 5,
        ..small_config(path.clone(), output)
    };

    let trainer = Trainer::new(config).unwrap();
    trainer.train().unwrap();
    trainer.save_vectors().unwrap();

    assert!(!scratch_path("rare-vec.source").exists());
    assert!(!scratch_path("rare-vec.target").exists());
    let _ = fs::remove_file(path);
}

#[test]
fn stdin_corpus_is_rejected_before_training() {
    let config = Config {
        input: PathBuf::from("-"),
        output: scratch_path("stdin-vec"),
        ..Config::default()
    };
    let err = Trainer::new(config).err().unwrap();
    assert!(err.to_string().contains("stdin"));
}

#[test]
fn unreadable_corpus_is_rejected_before_training() {
    let config = Config {
        input: scratch_path("no-such-corpus.txt"),
        output: scratch_path("missing-vec"),
        ..Config::default()
    };
    let err = Trainer::new(config).err().unwrap();
    assert!(err.to_string().contains("cannot be opened"));
}

#[test]
fn sub_character_objectives_fail_up_front() {
    let corpus = write_corpus("subchar.txt");
    for objective in [Objective::SubcharChinese, Objective::Subradical] {
        let config = Config {
            objective,
            ..small_config(corpus.clone(), scratch_path("subchar-vec"))
        };
        assert!(Trainer::new(config).is_err());
    }
    let _ = fs::remove_file(corpus);
}

use std::cmp::Reverse;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ordered_float::OrderedFloat;

use wordvec::{dot, Vectors};

/// number of closest words that will be shown
const N: usize = 40;

#[derive(Parser)]
#[command(about = "Query nearest neighbors in a trained vector file", long_about = None)]
struct Options {
    /// A .source or .target file written by the trainer
    #[arg(value_name = "FILE")]
    file_name: PathBuf,
}

fn main() -> Result<()> {
    let options = Options::parse();
    let vectors = Vectors::load(&options.file_name)?;

    let stdin = io::stdin();
    print!("Enter word (EXIT to break): ");
    io::stdout().flush().context("error writing prompt")?;
    for line in stdin.lock().lines() {
        let line = line.context("error reading query")?;
        let word = line.trim();
        if word == "EXIT" {
            break;
        }
        if !word.is_empty() {
            match vectors.lookup_word(word) {
                None => println!("Out of dictionary word!"),
                Some(i) => {
                    let mut ranked: Vec<(usize, f32)> = (0..vectors.num_words())
                        .filter(|&j| j != i)
                        .map(|j| (j, dot(&vectors[i], &vectors[j])))
                        .collect();
                    ranked.sort_by_key(|&(_, d)| Reverse(OrderedFloat(d)));

                    println!("\n{:>40} {:>14}\n", "Word", "Cosine");
                    for (j, d) in ranked.into_iter().take(N) {
                        println!("{:>40} {:>14.6}", vectors.word(j), d);
                    }
                }
            }
        }
        print!("Enter word (EXIT to break): ");
        io::stdout().flush().context("error writing prompt")?;
    }
    Ok(())
}

use std::process;

use anyhow::Result;
use clap::Parser;

use wordvec::config::{Cli, Config};
use wordvec::trainer::Trainer;

fn run(config: Config) -> Result<()> {
    let objective = config.objective;
    println!(
        "Training {} embeddings using file {}",
        objective,
        config.input.display()
    );
    let trainer = Trainer::new(config)?;
    trainer.train()?;
    trainer.save_vectors()?;
    println!("Training {objective} embeddings finished");
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli.command.into_config()) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

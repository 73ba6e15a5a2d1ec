use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use structure_recover_core::{generate_ast, NoopPostPass, Paths, StructurerConfig};

mod cfg_file;

use cfg_file::CfgFile;

#[derive(Parser)]
#[command(name = "structrecover")]
#[command(about = "Structural control-flow recovery: CFG + natural loops to AST")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Structure a CFG described as JSON and print the recovered AST.
    Structure {
        /// Path to a CFG description (see cfg_file::CfgFile for the schema).
        #[arg(short, long)]
        cfg_file: PathBuf,

        /// Disable and-if collapsing.
        #[arg(long)]
        no_and_if: bool,

        /// Print the AST as JSON instead of the pseudo-code rendering.
        #[arg(long)]
        json: bool,

        /// Check the reachability-preservation law against the input CFG.
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Structure {
            cfg_file,
            no_and_if,
            json,
            validate,
        } => run_structure(&cfg_file, !no_and_if, json, validate)?,
    }

    Ok(())
}

fn run_structure(cfg_path: &PathBuf, emit_and_if: bool, json: bool, validate: bool) -> anyhow::Result<()> {
    let pb = create_spinner("Loading CFG...");
    let cfg = CfgFile::load(cfg_path)?;
    pb.finish_with_message("CFG loaded");

    let mut paths = Paths::new(&cfg);
    for (addrs, looping) in &cfg.seed_paths {
        paths.add(addrs.clone(), *looping);
    }

    let pb = create_spinner("Structuring control flow...");
    let config = StructurerConfig { emit_and_if };
    let ast = generate_ast(&cfg, &mut paths, &config, &NoopPostPass)?;
    pb.finish_with_message("Structuring complete");

    if validate {
        let reachable = cfg.blocks.keys().copied().collect();
        if let Err(errors) = structure_recover_core::validator::validate_reachability(&ast, &cfg, &reachable) {
            for err in errors {
                log::warn!("{err}");
            }
        } else {
            log::info!("reachability check passed");
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&ast)?);
    } else {
        print!("{}", structure_recover_core::pretty::render(&ast));
    }

    Ok(())
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb
}

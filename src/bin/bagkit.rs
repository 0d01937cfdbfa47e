use std::path::PathBuf;
use std::process::exit;

use ansi_term::Colour;
use bagkit::bagit::{Bag, Result};
use clap::AppSettings::UseLongFormatForHelpSubcommand;
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

/// A CLI for validating BagIt bags
#[derive(Debug, Parser)]
#[clap(name = "bagkit", version)]
#[clap(setting(UseLongFormatForHelpSubcommand))]
pub struct BagkitArgs {
    /// Suppress error messages and other command specific logging
    #[clap(short, long)]
    pub quiet: bool,

    /// Increase log level
    #[clap(short = 'V', long)]
    pub verbose: bool,

    /// Disable all output styling
    #[clap(short = 'S', long)]
    pub no_styles: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[clap(name = "validate")]
    Validate(ValidateCmd),
}

/// Validate an existing bag
///
/// Exits 0 when the bag is valid and 1 when it is not.
#[derive(Args, Debug)]
pub struct ValidateCmd {
    /// Absolute or relative path to the bag's base directory or archive
    #[clap(value_name = "BAG_PATH")]
    pub bag_path: PathBuf,

    /// Print validation errors; pass twice to also print warnings
    #[clap(short = 'v', long = "show-issues", parse(from_occurrences))]
    pub show_issues: u8,
}

fn main() {
    let mut args = BagkitArgs::parse();

    let log_level = if args.quiet {
        LevelFilter::Off
    } else if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::builder()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    // If the output is being piped then we should disable styling
    if atty::isnt(atty::Stream::Stdout) {
        args.no_styles = true;
    }

    match exec(&args) {
        Ok(valid) => exit(if valid { 0 } else { 1 }),
        Err(e) => {
            if !args.quiet {
                let message = format!("Error: {e}");
                if args.no_styles {
                    eprintln!("{message}");
                } else {
                    eprintln!("{}", Colour::Red.paint(message));
                }
            }
            exit(1);
        }
    }
}

fn exec(args: &BagkitArgs) -> Result<bool> {
    match &args.command {
        Command::Validate(cmd) => {
            let mut bag = Bag::load(&cmd.bag_path)?;
            let valid = bag.validate()?;

            if cmd.show_issues >= 1 {
                for error in bag.errors() {
                    if args.no_styles {
                        println!("error: {error}");
                    } else {
                        println!("{} {error}", Colour::Red.paint("error:"));
                    }
                }
            }
            if cmd.show_issues >= 2 {
                for warning in bag.warnings() {
                    if args.no_styles {
                        println!("warning: {warning}");
                    } else {
                        println!("{} {warning}", Colour::Yellow.paint("warning:"));
                    }
                }
            }

            if valid {
                println!("Bag at {} is valid", cmd.bag_path.display());
            } else {
                println!("Bag at {} is invalid", cmd.bag_path.display());
            }

            Ok(valid)
        }
    }
}

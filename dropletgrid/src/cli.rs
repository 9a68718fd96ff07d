//! The `dropletgrid` CLI for inspecting domain decompositions and running superdroplet transport simulations.
//!
//! The decomposition, the gridbox maps and the transport of superdroplets are provided by the
//! [`dropletgrid_lib`] crate. Ranks of a simulation run as threads of this process.

use crate::{decompose, logging, simulate};
use anyhow::Context;
use clap::Parser;
use log::info;

static HELP_TEMPLATE: &str = "{before-help}{name} (v{version}) - {author-with-newline}{about-with-newline}\n{usage-heading} {usage}\n\n{all-args}{after-help}";

#[derive(Clone, Debug, clap::Parser)]
#[command(
    name = "dropletgrid",
    author = "The dropletgrid developers",
    about = "Domain decomposition and cross-rank transport of superdroplets",
    version,
    propagate_version = true,
    help_template = HELP_TEMPLATE,
)]
struct CommandlineArgs {
    /// Enable quiet mode (no output except for severe panic messages), overrides verbosity level
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
    /// Print more verbose output, use multiple "v"s for even more verbose output (-v, -vv, -vvv)
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,
    /// Only print info and debug output of this rank, other ranks still report warnings and errors
    #[arg(long, global = true)]
    log_rank: Option<usize>,
    /// Subcommands
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Clone, Debug, clap::Parser)]
enum Subcommand {
    /// Print the decomposition of a grid among a number of processes
    #[command(help_template = HELP_TEMPLATE)]
    Decompose(decompose::DecomposeSubcommandArgs),
    /// Run a superdroplet transport simulation with one thread per rank
    #[command(help_template = HELP_TEMPLATE)]
    Simulate(simulate::SimulateSubcommandArgs),
}

/// A simple on/off switch for command line arguments.
///
/// For example an argument defined as:
/// ```rust ignore
/// /// Re-insert superdroplets leaving through the bottom at the top of the domain
/// #[arg(
///     long,
///     default_value = "off",
///     value_name = "off|on",
///     ignore_case = true,
///     require_equals = true
/// )]
/// pub periodic_top: Switch,
/// ```
/// can be used in the CLI as `--periodic-top=on` or `--periodic-top=off`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Switch {
    Off,
    On,
}

impl Switch {
    pub(crate) fn into_bool(self) -> bool {
        match self {
            Switch::Off => false,
            Switch::On => true,
        }
    }
}

/// Runs the dropletgrid CLI with the provided command line arguments.
///
/// This function behaves like the binary `dropletgrid` command line tool including output to stdout
/// and stderr. It will also exit the process depending on the command line arguments, so it should
/// not be used in typical library contexts.
/// Note that the first argument is always ignored - this is typically the binary name when called using
/// `std::env::args()` from the terminal:
/// ```
/// dropletgrid::cli::run_dropletgrid(["dropletgrid", "--version"]);
/// ```
pub fn run_dropletgrid<I, T>(args: I) -> Result<(), anyhow::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    run_dropletgrid_impl(args).inspect_err(logging::log_error)
}

fn run_dropletgrid_impl<I, T>(args: I) -> Result<(), anyhow::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cmd_args = CommandlineArgs::parse_from(args);

    let verbosity = VerbosityLevel::from(cmd_args.verbosity);
    let is_quiet = cmd_args.quiet;

    logging::initialize_logging(verbosity, is_quiet, cmd_args.log_rank)
        .context("Failed to initialize logging")?;
    logging::log_program_info();

    // Delegate to subcommands
    let result = match &cmd_args.subcommand {
        Subcommand::Decompose(cmd_args) => decompose::decompose_subcommand(cmd_args),
        Subcommand::Simulate(cmd_args) => simulate::simulate_subcommand(cmd_args),
    };

    // Write profiling stats using log::info
    match dropletgrid_lib::profiling::write_to_string() {
        Ok(timings) if !timings.is_empty() => {
            info!("Timings:");
            timings
                .split("\n")
                .filter(|l| !l.is_empty())
                .for_each(|l| info!("{}", l));
        }
        Ok(_) => {}
        Err(err) => info!("Unable to format timings: {}", err),
    }

    info!(
        "Finished at {}.",
        chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
    );

    result
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum VerbosityLevel {
    None,
    Verbose,
    VeryVerbose,
    VeryVeryVerbose,
}

impl From<u8> for VerbosityLevel {
    fn from(value: u8) -> Self {
        match value {
            0 => VerbosityLevel::None,
            1 => VerbosityLevel::Verbose,
            2 => VerbosityLevel::VeryVerbose,
            _ => VerbosityLevel::VeryVeryVerbose,
        }
    }
}

impl VerbosityLevel {
    /// Maps this verbosity level to a log filter
    pub fn into_filter(self) -> Option<log::LevelFilter> {
        match self {
            VerbosityLevel::None => None,
            VerbosityLevel::Verbose => Some(log::LevelFilter::Info),
            VerbosityLevel::VeryVerbose => Some(log::LevelFilter::Debug),
            VerbosityLevel::VeryVeryVerbose => Some(log::LevelFilter::Trace),
        }
    }
}

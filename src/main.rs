use ayup::cli::commands::{CliArgs, Commands};
use ayup::cli::handlers::{handle_assistants, handle_state};
use ayup::util::logging::{self, LoggingConfig};
use ayup::VERSION;

use clap::Parser;
use tracing::{debug, Level};

fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("ayup v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::State(state_args) => handle_state(&state_args.command, args.quiet),
        Commands::Assistants(assistants_args) => handle_assistants(&assistants_args.command),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        logging::parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        logging::init_from_env();
        return;
    };

    logging::init_logging(LoggingConfig::with_level(level));
}

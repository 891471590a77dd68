use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Local inspection of Ayup pipeline state and assistants
#[derive(Parser, Debug)]
#[command(
    name = "ayup",
    about = "Inspect and steer the Ayup build assistant pipeline",
    version,
    author,
    long_about = "ayup walks an application source tree through a chain of assistants \
                  that produce a build graph and run the result. These commands inspect \
                  and edit the pipeline state kept in the .ayup directory of a project."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Inspect or change the pipeline state of a project")]
    State(StateArgs),

    #[command(about = "Work with the assistant registry")]
    Assistants(AssistantsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    #[command(about = "Show the first assistant that will run")]
    Show {
        #[arg(long, value_name = "DIR", help = "Project directory (defaults to current directory)")]
        path: Option<PathBuf>,
    },

    #[command(
        about = "Set the first assistant that will run",
        long_about = "Records which assistant the pipeline starts with.\n\n\
                      Examples:\n  \
                      ayup state set-assistant builtin:dockerfile\n  \
                      ayup state set-assistant local:my-assistant --path ./app\n  \
                      ayup state set-assistant nil"
    )]
    SetAssistant {
        #[arg(value_name = "NAME", help = "Assistant name as kind:name, or nil to clear")]
        name: String,

        #[arg(long, value_name = "DIR", help = "Project directory (defaults to current directory)")]
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AssistantsArgs {
    #[command(subcommand)]
    pub command: AssistantsCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AssistantsCommand {
    #[command(about = "List every assistant the registry would hold")]
    List {
        #[arg(
            long,
            value_name = "DIR",
            help = "Local assistants directory (defaults to AYUP_LOCAL_ASSISTANTS_DIR)"
        )]
        dir: Option<PathBuf>,
    },
}

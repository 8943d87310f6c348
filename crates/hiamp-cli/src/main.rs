// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The `hiamp` command-line driver.

mod commands;
mod format;

use clap::{Parser, Subcommand, ValueEnum};
use commands::CommandFailure;
use hiamp_message::{AckMode, Intent, Priority};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;


#[derive(Parser, Debug)]
#[command(name = "hiamp", version, about = "Cross-HQ messaging and artifact exchange")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the HQ config (falls back to HIAMP_CONFIG_PATH).
    #[arg(long, global = true, env = "HIAMP_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// HQ root directory holding workspace state.
    #[arg(long, global = true, default_value = ".")]
    hq_root: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a message to a peer worker.
    Send {
        /// Destination address (peer/worker).
        #[arg(long)]
        to: String,

        /// Message intent.
        #[arg(long, value_enum)]
        intent: IntentArg,

        /// Body text.
        #[arg(long)]
        body: String,

        /// Full sender address (overrides --worker).
        #[arg(long)]
        from: Option<String>,

        /// Local sending worker (combined with the HQ owner).
        #[arg(long)]
        worker: Option<String>,

        /// Continue an existing thread.
        #[arg(long)]
        thread: Option<String>,

        /// Priority hint.
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,

        /// Ack expectation.
        #[arg(long, value_enum)]
        ack: Option<AckArg>,

        /// Context tag for channel routing.
        #[arg(long)]
        context: Option<String>,

        /// External reference URL.
        #[arg(long = "ref")]
        reference: Option<String>,
    },

    /// List received messages.
    Inbox {
        /// Only this worker's inbox (default: every worker).
        #[arg(long)]
        worker: Option<String>,

        /// Include already-read messages.
        #[arg(long)]
        all: bool,
    },

    /// Reply to a received message.
    Reply {
        /// Id of the message being answered.
        #[arg(long)]
        message_id: String,

        /// Body text.
        #[arg(long)]
        body: String,

        /// Ack expectation for the reply.
        #[arg(long, value_enum)]
        ack: Option<AckArg>,
    },

    /// Print a thread's message log.
    Thread {
        /// Thread id.
        #[arg(long)]
        thread_id: String,
    },

    /// Share knowledge files with a peer (bundle export + share message).
    Share {
        /// Destination address (peer/worker).
        #[arg(long)]
        to: String,

        /// Comma-separated HQ-relative paths to bundle.
        #[arg(long)]
        files: String,

        /// Body text of the accompanying message.
        #[arg(long)]
        body: String,

        /// Knowledge domain tag (derived from the first path when omitted).
        #[arg(long)]
        domain: Option<String>,

        /// Local sending worker.
        #[arg(long)]
        worker: Option<String>,
    },

    /// Migrate the config between transports.
    Migrate {
        /// Source transport (only `slack` is supported).
        #[arg(long, value_enum)]
        from: TransportArg,

        /// Target transport (only `linear` is supported).
        #[arg(long, value_enum)]
        to: TransportArg,

        /// Team key for the migrated config.
        #[arg(long, default_value = "ENG")]
        default_team: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IntentArg {
    Handoff,
    Request,
    Inform,
    Acknowledge,
    Query,
    Response,
    Error,
    Share,
}

impl From<IntentArg> for Intent {
    fn from(v: IntentArg) -> Self {
        match v {
            IntentArg::Handoff => Intent::Handoff,
            IntentArg::Request => Intent::Request,
            IntentArg::Inform => Intent::Inform,
            IntentArg::Acknowledge => Intent::Acknowledge,
            IntentArg::Query => Intent::Query,
            IntentArg::Response => Intent::Response,
            IntentArg::Error => Intent::Error,
            IntentArg::Share => Intent::Share,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<PriorityArg> for Priority {
    fn from(v: PriorityArg) -> Self {
        match v {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Urgent => Priority::Urgent,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AckArg {
    None,
    Optional,
    Requested,
}

impl From<AckArg> for AckMode {
    fn from(v: AckArg) -> Self {
        match v {
            AckArg::None => AckMode::None,
            AckArg::Optional => AckMode::Optional,
            AckArg::Requested => AckMode::Requested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportArg {
    Slack,
    Linear,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("hiamp=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hiamp=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = commands::Context {
        config_path: cli.config,
        hq_root: cli.hq_root,
    };

    let result = match cli.command {
        Commands::Send {
            to,
            intent,
            body,
            from,
            worker,
            thread,
            priority,
            ack,
            context,
            reference,
        } => {
            commands::send(
                &ctx,
                commands::SendArgs {
                    to,
                    intent: intent.into(),
                    body,
                    from,
                    worker,
                    thread,
                    priority: priority.map(Into::into),
                    ack: ack.map(Into::into),
                    context,
                    reference,
                },
            )
            .await
        }
        Commands::Inbox { worker, all } => commands::inbox(&ctx, worker.as_deref(), all),
        Commands::Reply {
            message_id,
            body,
            ack,
        } => commands::reply(&ctx, &message_id, body, ack.map(Into::into)).await,
        Commands::Thread { thread_id } => commands::thread(&ctx, &thread_id),
        Commands::Share {
            to,
            files,
            body,
            domain,
            worker,
        } => commands::share(&ctx, &to, &files, body, domain, worker).await,
        Commands::Migrate {
            from,
            to,
            default_team,
        } => {
            if from != TransportArg::Slack || to != TransportArg::Linear {
                Err(CommandFailure::usage(
                    "only --from slack --to linear is supported",
                ))
            } else {
                commands::migrate(&ctx, &default_team)
            }
        }
    };

    if let Err(failure) = result {
        eprint!("{failure}");
        std::process::exit(failure.exit_code());
    }
}

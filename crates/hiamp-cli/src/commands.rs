// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subcommand implementations.

use crate::format;
use hiamp_config::paths::HqPaths;
use hiamp_config::{ConfigError, HqConfig, Settings, TransportKind};
use hiamp_error::HqError;
use hiamp_events::EventBus;
use hiamp_inbox::{InboxEntry, InboxStore};
use hiamp_message::{AckMode, Intent, Priority};
use hiamp_sender::{SendRequest, Sender};
use hiamp_thread::ThreadStore;
use hiamp_transfer::export::{KnowledgeExport, export_knowledge};
use hiamp_transfer::{TransferError, TransferLog};
use hiamp_transport::Transport;
use hiamp_transport_chat::ChatTransport;
use hiamp_transport_chat::client::SlackApiClient;
use hiamp_transport_tracker::TrackerTransport;
use hiamp_transport_tracker::client::LinearApiClient;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A failed command, rendered as the user-visible failure shape:
/// `Error: <message>` then the code in brackets, then field lines.
#[derive(Debug)]
pub struct CommandFailure {
    message: String,
    code: Option<String>,
    fields: Vec<String>,
    exit_code: i32,
}

impl CommandFailure {
    fn new(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
            fields: Vec::new(),
            exit_code: 1,
        }
    }

    /// A usage-level failure (exit code 2).
    pub fn usage(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            fields: Vec::new(),
            exit_code: 2,
        }
    }

    /// The process exit code this failure asks for.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.message)?;
        if let Some(code) = &self.code {
            writeln!(f, "[{code}]")?;
        }
        for field in &self.fields {
            writeln!(f, "  {field}")?;
        }
        Ok(())
    }
}

impl From<HqError> for CommandFailure {
    fn from(e: HqError) -> Self {
        Self::new(e.message.clone(), Some(e.code.as_str().to_string()))
    }
}

impl From<ConfigError> for CommandFailure {
    fn from(e: ConfigError) -> Self {
        let mut failure = Self::new(e.to_string(), Some(e.code().as_str().to_string()));
        failure.fields = e.issues().iter().map(ToString::to_string).collect();
        failure
    }
}

impl From<TransferError> for CommandFailure {
    fn from(e: TransferError) -> Self {
        Self::new(e.to_string(), Some(e.code().as_str().to_string()))
    }
}

fn internal(e: impl fmt::Display) -> CommandFailure {
    CommandFailure::new(e.to_string(), None)
}

/// Global options shared by every subcommand.
pub struct Context {
    /// `--config` / `HIAMP_CONFIG_PATH`.
    pub config_path: Option<PathBuf>,
    /// `--hq-root`.
    pub hq_root: PathBuf,
}

impl Context {
    fn load_config(&self) -> Result<Arc<HqConfig>, CommandFailure> {
        let path = self.config_path.as_ref().ok_or_else(|| {
            CommandFailure::new(
                "no config file: pass --config or set HIAMP_CONFIG_PATH",
                Some("CONFIG_MISSING".into()),
            )
        })?;
        Ok(Arc::new(hiamp_config::load_file(path)?))
    }

    /// Settings from the config when one is reachable, defaults otherwise —
    /// read-only commands work without a config file.
    fn settings(&self) -> Settings {
        self.config_path
            .as_ref()
            .and_then(|p| hiamp_config::load_file(p).ok())
            .map(|c| c.settings)
            .unwrap_or_default()
    }

    fn paths(&self, settings: &Settings) -> HqPaths {
        HqPaths::new(&self.hq_root, settings)
    }

    fn build_transport(&self, config: &HqConfig) -> Result<Arc<dyn Transport>, CommandFailure> {
        match config.transport {
            TransportKind::Slack => {
                let chat = config.slack.clone().ok_or_else(|| {
                    CommandFailure::new("config has no slack block", Some("CONFIG_VALIDATION".into()))
                })?;
                let api = Arc::new(SlackApiClient::new(
                    chat.bot_token.clone(),
                    chat.app_token.clone(),
                ));
                let peer_bots: BTreeMap<String, String> = config
                    .peers
                    .iter()
                    .filter_map(|p| p.bot_id.clone().map(|b| (p.owner.clone(), b)))
                    .collect();
                Ok(Arc::new(ChatTransport::new(
                    api,
                    chat,
                    config.identity.owner.clone(),
                    peer_bots,
                )))
            }
            TransportKind::Linear => {
                let tracker = config.linear.clone().ok_or_else(|| {
                    CommandFailure::new("config has no linear block", Some("CONFIG_VALIDATION".into()))
                })?;
                let api = Arc::new(LinearApiClient::new(tracker.api_key.clone()));
                Ok(Arc::new(TrackerTransport::new(api, tracker)))
            }
        }
    }

    fn build_sender(&self, config: &Arc<HqConfig>) -> Result<Sender, CommandFailure> {
        let transport = self.build_transport(config)?;
        let paths = self.paths(&config.settings);
        Ok(Sender::new(
            config.clone(),
            transport,
            ThreadStore::new(paths.threads()),
            EventBus::new(),
        ))
    }
}

/// Arguments of the `send` subcommand.
pub struct SendArgs {
    /// Destination address.
    pub to: String,
    /// Intent.
    pub intent: Intent,
    /// Body text.
    pub body: String,
    /// Full sender address.
    pub from: Option<String>,
    /// Local sending worker.
    pub worker: Option<String>,
    /// Thread to continue.
    pub thread: Option<String>,
    /// Priority hint.
    pub priority: Option<Priority>,
    /// Ack expectation.
    pub ack: Option<AckMode>,
    /// Context tag.
    pub context: Option<String>,
    /// Reference URL.
    pub reference: Option<String>,
}

/// `hiamp send`
pub async fn send(ctx: &Context, args: SendArgs) -> Result<(), CommandFailure> {
    let config = ctx.load_config()?;
    let sender = ctx.build_sender(&config)?;
    let receipt = sender
        .send(SendRequest {
            from: args.from,
            worker: args.worker,
            to: args.to,
            intent: Some(args.intent),
            body: args.body,
            thread: args.thread,
            reply_to: None,
            priority: args.priority,
            ack: args.ack,
            context: args.context,
            reference: args.reference,
            channel_id: None,
        })
        .await?;
    print!("{}", format::render_receipt(&receipt));
    Ok(())
}

fn open_inbox(ctx: &Context) -> (InboxStore, PathBuf) {
    let settings = ctx.settings();
    let paths = ctx.paths(&settings);
    let base = paths.inbox_root().to_path_buf();
    (InboxStore::new(&base), base)
}

fn inbox_workers(base: &std::path::Path) -> Vec<String> {
    let mut workers: Vec<String> = std::fs::read_dir(base)
        .map(|read| {
            read.flatten()
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    workers.sort();
    workers
}

/// `hiamp inbox`
pub fn inbox(ctx: &Context, worker: Option<&str>, all: bool) -> Result<(), CommandFailure> {
    let (store, base) = open_inbox(ctx);
    let workers = match worker {
        Some(one) => vec![one.to_string()],
        None => inbox_workers(&base),
    };

    if workers.is_empty() {
        println!("inbox is empty");
        return Ok(());
    }
    for worker in workers {
        let entries = store.list(&worker, all).map_err(internal)?;
        let unread = store.unread_count(&worker).map_err(internal)?;
        print!("{}", format::render_inbox(&worker, unread, &entries));
    }
    Ok(())
}

fn find_entry(
    store: &InboxStore,
    base: &std::path::Path,
    message_id: &str,
) -> Result<InboxEntry, CommandFailure> {
    for worker in inbox_workers(base) {
        if let Ok(Some(entry)) = store.get(&worker, message_id) {
            return Ok(entry);
        }
    }
    Err(CommandFailure::new(
        format!("message '{message_id}' is not in any inbox"),
        Some("INVALID_MESSAGE".into()),
    ))
}

/// `hiamp reply`
pub async fn reply(
    ctx: &Context,
    message_id: &str,
    body: String,
    ack: Option<AckMode>,
) -> Result<(), CommandFailure> {
    let config = ctx.load_config()?;
    let (store, base) = open_inbox(ctx);
    let entry = find_entry(&store, &base, message_id)?;

    let sender = ctx.build_sender(&config)?;
    let receipt = sender
        .send(SendRequest {
            // The addressed worker answers the original sender.
            from: Some(entry.message.to.to_string()),
            worker: None,
            to: entry.message.from.to_string(),
            intent: Some(Intent::Response),
            body,
            thread: entry.message.thread.clone(),
            reply_to: Some(entry.message.id.clone()),
            priority: None,
            ack,
            context: entry.message.context.clone(),
            reference: None,
            channel_id: None,
        })
        .await?;
    print!("{}", format::render_receipt(&receipt));
    Ok(())
}

/// `hiamp thread`
pub fn thread(ctx: &Context, thread_id: &str) -> Result<(), CommandFailure> {
    let settings = ctx.settings();
    let paths = ctx.paths(&settings);
    let store = ThreadStore::new(paths.threads());
    let state = store
        .load(thread_id)
        .map_err(internal)?
        .ok_or_else(|| internal(format!("thread '{thread_id}' not found")))?;
    print!("{}", format::render_thread(&state));
    Ok(())
}

/// `hiamp share`
pub async fn share(
    ctx: &Context,
    to: &str,
    files: &str,
    body: String,
    domain: Option<String>,
    worker: Option<String>,
) -> Result<(), CommandFailure> {
    let config = ctx.load_config()?;
    let paths: Vec<String> = files
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if paths.is_empty() {
        return Err(CommandFailure::usage("--files must name at least one path"));
    }
    let peer = to
        .split_once('/')
        .map(|(owner, _)| owner.to_string())
        .unwrap_or_else(|| to.to_string());

    // Domain defaults to the directory segment under knowledge/.
    let domain = domain.unwrap_or_else(|| {
        paths[0]
            .trim_start_matches("knowledge/")
            .split('/')
            .next()
            .unwrap_or("general")
            .to_string()
    });

    let hq_paths = ctx.paths(&config.settings);
    let log = TransferLog::new(hq_paths.world_log());
    let outbox = ctx.hq_root.join("workspace/world/outbox");
    let summary = export_knowledge(
        &ctx.hq_root,
        &outbox,
        &KnowledgeExport {
            paths,
            domain,
            to_peer: peer,
            owner: config.identity.owner.clone(),
            instance_id: config.identity.instance_id.clone(),
            transport: config.transport.as_str().into(),
            description: Some(body.clone()),
            supersedes: None,
            sequence: None,
        },
        &log,
    )?;

    let sender = ctx.build_sender(&config)?;
    let receipt = sender
        .send(SendRequest {
            from: None,
            worker,
            to: to.to_string(),
            intent: Some(Intent::Share),
            body: format!(
                "{body}\n\nTransfer {} ({} file(s), {} bytes).",
                summary.transfer_id, summary.file_count, summary.payload_size
            ),
            thread: None,
            reply_to: None,
            priority: None,
            ack: None,
            context: None,
            reference: None,
            channel_id: None,
        })
        .await?;

    println!("bundle:  {}", summary.bundle_path.display());
    print!("{}", format::render_receipt(&receipt));
    Ok(())
}

/// `hiamp migrate`
pub fn migrate(ctx: &Context, default_team: &str) -> Result<(), CommandFailure> {
    let config = ctx.load_config()?;
    let outcome = hiamp_migrate::migrate_chat_to_tracker(&config, default_team)
        .map_err(|e| CommandFailure::new(e.to_string(), Some("CONFIG_VALIDATION".into())))?;

    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    for line in &outcome.summary {
        eprintln!("note: {line}");
    }
    let yaml = serde_yaml::to_string(&outcome.config).map_err(internal)?;
    print!("{yaml}");
    Ok(())
}

use std::future::Future;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use smol_str::SmolStr;
use tandem_common::LoopbackHub;
use tandem_common::telemetry::{self, TelemetryConfig};
use tandem_sync::{
    Command, FileDelta, LoopbackProvider, Position, SelectionRange, SelectionUpdate,
    SessionOptions, SyncError, Workspace, WorkspaceConfig, WorkspaceEvent, from_fn,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Parser)]
#[command(
    version,
    about = "Tandem - two replicas of a shared workspace, side by side",
    long_about = None
)]
struct Cli {
    /// Room both replicas join
    #[arg(long, env = "TANDEM_ROOM", default_value = "demo")]
    room: String,

    /// Nickname of the replica that creates the file
    #[arg(long, env = "TANDEM_NICKNAME", default_value = "alice")]
    nickname: String,

    /// Nickname of the replica that edits it
    #[arg(long, default_value = "bob")]
    peer: String,

    /// Path of the file the script works on
    #[arg(long, default_value = "src/main.rs")]
    file: String,
}

/// Host side of one running workspace.
struct Replica {
    nickname: String,
    commands: mpsc::Sender<Command>,
}

impl Replica {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| miette::miette!("{} stopped", self.nickname))
    }

    async fn content(&self, path: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetContent {
            path: path.into(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| miette::miette!("{} dropped the request", self.nickname))
    }
}

fn open(
    hub: &LoopbackHub,
    config: WorkspaceConfig,
    room: &str,
    nickname: &str,
) -> (
    Replica,
    mpsc::UnboundedReceiver<WorkspaceEvent>,
    impl Future<Output = Result<(), SyncError>> + use<>,
) {
    let (link, signals) = hub.join(nickname);
    let (commands, command_rx) = mpsc::channel(64);

    // The demo editor is a single long line.
    let mut ws = Workspace::new(config)
        .with_translator(from_fn(|_path, index| Some(Position::new(0, index as u32))));
    let events = ws.subscribe();
    let options = SessionOptions::new(room).with_nickname(nickname);
    let task = ws.run(LoopbackProvider::new(link), options, command_rx, signals);

    let replica = Replica {
        nickname: nickname.to_string(),
        commands,
    };
    (replica, events, task)
}

async fn script(file: SmolStr, creator: Replica, editor: Replica) -> Result<()> {
    creator
        .send(Command::CreateDir { path: "src".into() })
        .await?;
    creator
        .send(Command::CreateFile {
            path: file.clone(),
            content: "fn main() {}\n".into(),
        })
        .await?;
    creator.content(&file).await?;

    editor
        .send(Command::ChangeFile {
            path: file.clone(),
            delta: FileDelta::insert(11, "\n    println!(\"hello\");\n"),
        })
        .await?;
    editor
        .send(Command::ChangeSelection(SelectionUpdate {
            path: file.clone(),
            ranges: vec![SelectionRange::cursor(Position::new(1, 4))],
        }))
        .await?;
    let edited = editor.content(&file).await?;
    let seen = creator.content(&file).await?;
    // The creator's host applies the delivered edit to its buffer.
    creator
        .send(Command::Applied { path: file.clone() })
        .await?;

    if edited != seen {
        return Err(miette::miette!(
            "replicas diverged: {edited:?} vs {seen:?}"
        ));
    }
    println!("→ {file} on both replicas:");
    println!("{}", seen.unwrap_or_default());

    editor.send(Command::Destroy).await?;
    creator.send(Command::Destroy).await?;
    Ok(())
}

fn print_events(
    nickname: &str,
    events: &mut mpsc::UnboundedReceiver<WorkspaceEvent>,
) -> Result<()> {
    while let Ok(event) = events.try_recv() {
        let json = serde_json::to_string(&event).into_diagnostic()?;
        println!("{nickname}: {json}");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_miette();
    telemetry::init(TelemetryConfig::from_env("tandem"));

    let cli = Cli::parse();
    let config = WorkspaceConfig::from_env()?;
    let hub = LoopbackHub::new();

    let (creator, mut creator_events, creator_task) =
        open(&hub, config.clone(), &cli.room, &cli.nickname);
    let (editor, mut editor_events, editor_task) = open(&hub, config, &cli.room, &cli.peer);

    tracing::info!(room = %cli.room, "starting demo");
    let (creator_result, editor_result, script_result) = tokio::join!(
        creator_task,
        editor_task,
        script(SmolStr::new(&cli.file), creator, editor)
    );

    print_events(&cli.nickname, &mut creator_events)?;
    print_events(&cli.peer, &mut editor_events)?;

    script_result?;
    creator_result?;
    editor_result?;
    Ok(())
}

fn init_miette() {
    let _ = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }));
    miette::set_panic_hook();
}

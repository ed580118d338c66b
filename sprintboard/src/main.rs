//! Sprint-board coordinator CLI.
//!
//! Coordinates parallel development sessions over one backlog: claims,
//! progress, completion, and cleanup of whatever sessions leave behind.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use sprintboard::core::reconcile::GcMode;
use sprintboard::exit_codes;
use sprintboard::gc;
use sprintboard::io::backlog::MarkdownBacklog;
use sprintboard::io::config::{BoardConfig, load_config};
use sprintboard::io::containers::ComposeRuntime;
use sprintboard::io::git::Git;
use sprintboard::io::init::{InitOptions, init_board_dir};
use sprintboard::io::lock::DirLock;
use sprintboard::io::paths::BoardPaths;
use sprintboard::io::store::{BoardStore, FileBackend};
use sprintboard::io::workspace::GitWorkspace;
use sprintboard::logging;
use sprintboard::session::{ClaimRequest, Coordinator};
use sprintboard::status::{board_status, render_ports};

type CliCoordinator = Coordinator<FileBackend, DirLock, GitWorkspace, ComposeRuntime>;

#[derive(Parser)]
#[command(
    name = "sprintboard",
    version,
    about = "Coordinate parallel development sessions on a shared sprint board"
)]
struct Cli {
    /// Project root containing `.sprintboard/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.sprintboard/` with a default config and import the backlog.
    Init {
        /// Overwrite an existing config with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Show stories, sessions, stale sessions and port advisories.
    Status,
    /// Claim a ready story and set up its working copy.
    Claim {
        story: String,
        /// Session id (generated when omitted).
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// Move a claimed story to in-progress.
    Start {
        session: String,
        #[arg(long)]
        task: Option<String>,
    },
    /// Record progress on a session.
    Checkpoint {
        session: String,
        #[arg(long)]
        task: Option<String>,
        /// Mark the session blocked instead of checkpointed.
        #[arg(long)]
        blocked: bool,
    },
    /// Attach the pull request and move the story to review.
    Review {
        session: String,
        #[arg(long)]
        pr: String,
    },
    /// Mark the story done and tear the session down.
    Complete { session: String },
    /// Reconcile the board against existing resources.
    Gc {
        #[arg(long, value_enum, default_value_t = GcModeArg::Orphans)]
        mode: GcModeArg,
        /// Story keys, session ids or resource names (with `--mode select`).
        #[arg(long = "select")]
        select: Vec<String>,
        /// Confirmation token for `--mode force`.
        #[arg(long)]
        confirm: Option<String>,
        /// Report what would be done without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the port slot layout.
    Ports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GcModeArg {
    Orphans,
    Select,
    Force,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Status => cmd_status(&root),
        Command::Claim {
            story,
            session,
            task,
        } => {
            let coord = open(&root)?;
            let session = coord.claim(
                ClaimRequest {
                    story_key: story,
                    session_id: session,
                    task,
                },
                Utc::now(),
            )?;
            println!("{}", session.id);
            println!("working copy: {}", session.working_copy.display());
            println!("branch: {}", session.branch);
            if let Some(slot) = session.port_slot {
                let range = coord.config().port_plan().slot_range(slot);
                println!("port slot {}: {}-{}", slot, range.start(), range.end());
            }
            Ok(exit_codes::OK)
        }
        Command::Start { session, task } => {
            let session = open(&root)?.start(&session, task, Utc::now())?;
            println!("{} {}", session.id, session.status);
            Ok(exit_codes::OK)
        }
        Command::Checkpoint {
            session,
            task,
            blocked,
        } => {
            let session = open(&root)?.checkpoint(&session, task, blocked, Utc::now())?;
            println!("{} {}", session.id, session.status);
            Ok(exit_codes::OK)
        }
        Command::Review { session, pr } => {
            let session = open(&root)?.review(&session, &pr, Utc::now())?;
            println!("{} {}", session.id, session.status);
            Ok(exit_codes::OK)
        }
        Command::Complete { session } => {
            for step in open(&root)?.complete(&session, Utc::now())? {
                println!("{step}");
            }
            Ok(exit_codes::OK)
        }
        Command::Gc {
            mode,
            select,
            confirm,
            dry_run,
        } => cmd_gc(&root, mode, select, confirm, dry_run),
        Command::Ports => {
            let paths = BoardPaths::new(&root);
            let cfg = load_config(&paths.config_path)?;
            let board = store(&paths, &cfg).read()?;
            print!("{}", render_ports(&board, &cfg.port_plan()));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_board_dir(root, &InitOptions { force })?;
    let cfg = load_config(&paths.config_path)?;
    let board = store(&paths, &cfg).initialize()?;
    println!(
        "initialized {} with {} stories",
        paths.board_path.display(),
        board.stories.len()
    );
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let paths = BoardPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let report = board_status(&store(&paths, &cfg), &cfg, Utc::now())?;
    print!("{}", report.render());
    Ok(if report.has_findings() {
        exit_codes::FINDINGS
    } else {
        exit_codes::OK
    })
}

fn cmd_gc(
    root: &Path,
    mode: GcModeArg,
    select: Vec<String>,
    confirm: Option<String>,
    dry_run: bool,
) -> Result<i32> {
    let mode = match mode {
        GcModeArg::Orphans if select.is_empty() => GcMode::Orphans,
        GcModeArg::Orphans | GcModeArg::Select => {
            if select.is_empty() {
                return Err(anyhow!("--mode select needs at least one --select <id>"));
            }
            GcMode::Selected(select)
        }
        GcModeArg::Force => GcMode::Force {
            confirm: confirm.unwrap_or_default(),
        },
    };
    let coord = open(root)?;
    let report = gc::run(&coord, &mode, dry_run, Utc::now())?;
    print!("{}", report.render());
    let pending = dry_run && !report.targets.is_empty();
    Ok(if report.has_failures() || pending {
        exit_codes::FINDINGS
    } else {
        exit_codes::OK
    })
}

fn store(paths: &BoardPaths, cfg: &BoardConfig) -> BoardStore<FileBackend, DirLock> {
    BoardStore::new(
        FileBackend::new(&paths.board_path),
        DirLock::from_config(&paths.lock_path, &cfg.lock),
        Box::new(MarkdownBacklog::new(paths.backlog_path(cfg))),
    )
}

fn open(root: &Path) -> Result<CliCoordinator> {
    let paths = BoardPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let naming = paths.naming(&cfg);
    let workspace = GitWorkspace::new(Git::new(&paths.root), naming.clone());
    let containers = ComposeRuntime::from_config(&cfg.containers);
    Ok(Coordinator::new(
        store(&paths, &cfg),
        workspace,
        containers,
        cfg,
        naming,
    ))
}

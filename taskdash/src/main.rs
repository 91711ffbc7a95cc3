//! `TaskDash`: task-assignment dashboard client.
//!
//! Connects to a task server (or a built-in demo server with `--offline`)
//! and runs one command. `watch` keeps both lists in sync and prints
//! changes until Ctrl-C. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/taskdash/config.toml`).
//!
//! ```bash
//! # Offline demo as user 2
//! cargo run --bin taskdash -- --offline --user-id 2 tasks
//!
//! # Against a server
//! TASKDASH_URL=https://tasks.example.com/api TASKDASH_USER=7 TASKDASH_TOKEN=... \
//!     cargo run --bin taskdash -- watch
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskdash::config::{CliArgs, ClientConfig, Command, ConfigError};
use taskdash::dashboard::Dashboard;
use taskdash::events::SyncEvent;
use taskdash::notifications::NotificationError;
use taskdash::tasks::TaskError;
use taskdash::tasks::query::{Direction, TaskQuery, active_only};
use taskdash::transport::http::HttpTransport;
use taskdash::transport::memory::MemoryBackend;
use taskdash::transport::{Session, Transport, TransportError};
use taskdash_proto::notification::NotificationId;
use taskdash_proto::task::{NewTask, Subtask, SubtaskId, Task, TaskFilter, TaskId, UserId};

/// Anything that can end a CLI run early.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error("failed to wait for Ctrl-C: {0}")]
    Signal(#[from] std::io::Error),
}

/// User the `--offline` demo acts as when none is configured.
const OFFLINE_DEFAULT_USER: i64 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so stdout stays clean for command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(offline = cli.offline, "taskdash starting");

    let command = cli.command.clone().unwrap_or(Command::Tasks {
        filter: TaskFilter::Received,
        status: None,
        search: None,
    });

    let result = if cli.offline {
        run_offline(&config, command).await
    } else {
        run_online(&config, command).await
    };

    tracing::info!("taskdash exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdash.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run_online(config: &ClientConfig, command: Command) -> Result<(), CliError> {
    let transport = HttpTransport::with_timeout(
        config.server_url()?,
        config.to_session()?,
        config.request_timeout,
    )?;
    run(Dashboard::new(transport, config.to_sync_config()), command).await
}

async fn run_offline(config: &ClientConfig, command: Command) -> Result<(), CliError> {
    let backend = Arc::new(MemoryBackend::demo());
    let user = config.user_id.unwrap_or(UserId::new(OFFLINE_DEFAULT_USER));
    let transport = backend.connect(Session::new(user, "offline"));
    println!("offline demo: acting as user {user}");
    run(Dashboard::new(transport, config.to_sync_config()), command).await
}

async fn run<T: Transport + 'static>(
    (mut dashboard, mut events): (Dashboard<T>, tokio::sync::mpsc::Receiver<SyncEvent>),
    command: Command,
) -> Result<(), CliError> {
    match command {
        Command::Watch => {
            dashboard.start();
            println!("watching for changes, Ctrl-C to stop");
            loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => {
                        signal?;
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => print_event(&dashboard, &event),
                        None => break,
                    },
                }
            }
        }
        Command::Tasks {
            filter,
            status,
            search,
        } => {
            let query = TaskQuery { status, search };
            match filter {
                TaskFilter::Received => {
                    dashboard.refresh_tasks().await?;
                    let tasks = dashboard.tasks(Direction::Received, &query);
                    print_tasks(&tasks, Direction::Received);
                }
                TaskFilter::Sent => {
                    dashboard.refresh_tasks().await?;
                    let tasks = dashboard.tasks(Direction::Sent, &query);
                    print_tasks(&tasks, Direction::Sent);
                }
                TaskFilter::All => {
                    let (tasks, users) = tokio::join!(
                        dashboard.api().fetch_tasks(TaskFilter::All),
                        dashboard.fetch_users()
                    );
                    let tasks: Vec<Task> = active_only(tasks?, &users?)
                        .into_iter()
                        .filter(|t| query.matches(t, Direction::Sent))
                        .collect();
                    print_tasks(&tasks, Direction::Sent);
                }
            }
        }
        Command::Users => {
            for user in dashboard.fetch_users().await? {
                println!(
                    "{:>4}  {:<16} {}",
                    user.id.get(),
                    user.username,
                    user.display_name()
                );
            }
        }
        Command::UserTasks { id } => {
            let listing = dashboard.user_tasks(UserId::new(id)).await?;
            println!("received:");
            print_tasks(&listing.received, Direction::Received);
            println!("sent:");
            print_tasks(&listing.sent, Direction::Sent);
        }
        Command::DeleteUser { id } => {
            dashboard.delete_user(UserId::new(id)).await?;
            println!("deleted user {id}");
        }
        Command::Create {
            to,
            title,
            description,
            due,
            subtasks,
        } => {
            let task = dashboard
                .create_task(NewTask {
                    receiver_id: UserId::new(to),
                    title,
                    description,
                    due_date: due,
                    subtasks: subtasks.into_iter().map(Subtask::new).collect(),
                })
                .await?;
            println!("created task #{}", task.id);
        }
        Command::Advance { id } => {
            dashboard.refresh_tasks().await?;
            dashboard.advance(id).await?;
            report_status(&dashboard, id);
        }
        Command::Cancel { id } => {
            dashboard.refresh_tasks().await?;
            dashboard.cancel(id).await?;
            report_status(&dashboard, id);
        }
        Command::SubtaskAdvance { id, subtask } => {
            dashboard.refresh_tasks().await?;
            let subtask = SubtaskId::new(subtask);
            dashboard.advance_subtask(id, &subtask).await?;
            if let Some(s) = dashboard.task(id).as_ref().and_then(|t| t.subtask(&subtask)) {
                println!("subtask {} is now {}", s.id, s.status);
            }
        }
        Command::SubtaskAdd { id, title } => {
            dashboard.refresh_tasks().await?;
            let subtask = dashboard.add_subtask(id, &title).await?;
            println!("added subtask {subtask} to task #{id}");
        }
        Command::Notifications => {
            dashboard.refresh_notifications().await?;
            for n in dashboard.notification_list() {
                let marker = if n.is_read { ' ' } else { '*' };
                println!(
                    "{marker} {:<10} {}  {}",
                    n.id.as_str(),
                    n.created_at.format("%Y-%m-%d %H:%M"),
                    n.message
                );
            }
            println!("{} unread", dashboard.unread());
        }
        Command::Read { id } => {
            dashboard.refresh_notifications().await?;
            if dashboard.mark_as_read(&NotificationId::new(id)).await? {
                println!("marked read, {} unread", dashboard.unread());
            } else {
                println!("already read");
            }
        }
        Command::ReadAll => {
            dashboard.refresh_notifications().await?;
            let marked = dashboard.mark_all_as_read().await?;
            println!("marked {marked} notifications read");
        }
        Command::DeleteAll { username, password } => {
            let report = dashboard.delete_all_tasks(&username, &password).await?;
            println!("deleted all tasks ({} removed locally)", report.evicted.len());
        }
    }

    dashboard.logout().await;
    Ok(())
}

fn print_tasks(tasks: &[Task], direction: Direction) {
    if tasks.is_empty() {
        println!("no tasks");
        return;
    }
    for task in tasks {
        let counterpart = match direction {
            Direction::Received => task.sender_name.as_deref().map(|n| format!("from {n}")),
            Direction::Sent => task.receiver_name.as_deref().map(|n| format!("to {n}")),
        }
        .unwrap_or_default();
        let due = task
            .due_date
            .map(|d| format!(" due {}", d.format("%Y-%m-%d")))
            .unwrap_or_default();
        println!(
            "#{:<4} [{:<11}] {}  {counterpart}{due}",
            task.id.get(),
            task.status.as_str(),
            task.title
        );
        for subtask in &task.subtasks {
            println!(
                "        - [{:<11}] {} ({})",
                subtask.status.as_str(),
                subtask.title,
                subtask.id
            );
        }
    }
}

fn report_status<T: Transport + 'static>(dashboard: &Dashboard<T>, id: TaskId) {
    if let Some(task) = dashboard.task(id) {
        println!("task #{} is now {}", task.id, task.status);
    }
}

fn print_event<T: Transport + 'static>(dashboard: &Dashboard<T>, event: &SyncEvent) {
    match event {
        SyncEvent::TaskAdded { task_id } | SyncEvent::TaskChanged { task_id } => {
            if let Some(task) = dashboard.task(*task_id) {
                println!("task #{} [{}] {}", task.id, task.status, task.title);
            }
        }
        SyncEvent::TaskEvicted { task_id } => println!("task #{task_id} removed"),
        SyncEvent::MutationFailed { task_id, message } => {
            println!("change to task #{task_id} failed: {message}");
        }
        SyncEvent::NotificationsUpdated { unread } => println!("{unread} unread notifications"),
        SyncEvent::NotificationWriteFailed { message } => {
            println!("marking notifications read failed: {message}");
        }
        SyncEvent::MutationApplied { .. }
        | SyncEvent::MutationConfirmed { .. }
        | SyncEvent::RefreshRequested => {}
    }
}

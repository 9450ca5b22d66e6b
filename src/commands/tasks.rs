use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;

use super::{Deck, OutputFormat, print_json, prompt_confirm, prompt_input, truncate};
use crate::autosave::{AutoSaver, Edit};
use crate::deps;
use crate::error::ExitError;
use crate::events::{Notice, Notifier, StderrNotifier, TaskEvent};
use crate::model::{NewTask, Task, TaskFilter, TaskStatus, validate_fields};
use crate::store::SortKey;
use crate::view::{TaskDetail, TaskView};

#[derive(Debug, Subcommand)]
pub enum TasksCommand {
    /// List tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "type")]
        issue_type: Option<String>,
        /// Sort order; remembered for later listings
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Show a task with its history, attachments and session logs
    Show {
        id: String,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Create a task
    Create {
        #[arg(long)]
        title: String,
        #[arg(long = "type", default_value = "task")]
        issue_type: String,
        #[arg(long, default_value_t = 2)]
        priority: u8,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Edit task fields; changes are auto-saved
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        priority: Option<u8>,
        #[arg(long = "type")]
        issue_type: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long = "label")]
        labels: Option<Vec<String>>,
        /// Prompt for title, description and priority
        #[arg(short, long)]
        interactive: bool,
    },
    /// Delete a task
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show a task's activity history
    History {
        id: String,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// List a task's image attachments
    Images {
        id: String,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Upload an image and attach it to a task
    Attach { id: String, file: PathBuf },
    /// List a task's session logs, or print one
    Logs {
        id: String,
        file: Option<String>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Replace every field of a task from a JSON file (`-` reads stdin)
    Replace {
        id: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Move a task to another project; prints the new id
    Migrate {
        id: String,
        #[arg(long)]
        project: String,
    },
    /// List tasks ready to be worked on
    Ready {
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Manage a task's dependencies
    Deps {
        #[command(subcommand)]
        command: DepsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum DepsCommand {
    /// List tasks this task may depend on
    Candidates {
        id: String,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },
    /// Add a dependency
    Add { id: String, dependency: String },
    /// Remove a dependency
    Remove { id: String, dependency: String },
}

impl TasksCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let deck = Deck::connect()?;
        let api = deck.api();
        match self {
            TasksCommand::List { status, project, issue_type, sort, format } => {
                let mut store = deck.store();
                let key = sort.or_else(|| store.as_ref().map(|s| s.prefs.sort)).unwrap_or_default();
                if let (Some(chosen), Some(store)) = (sort, store.as_mut())
                    && store.prefs.sort != chosen
                {
                    store.prefs.sort = chosen;
                    if let Err(e) = store.save() {
                        tracing::warn!(error = %e, "could not remember sort order");
                    }
                }
                let filter = TaskFilter { status, project, issue_type };
                let mut tasks = api.list_tasks(&filter).map_err(|e| deck.fail(e))?;
                key.sort(&mut tasks);
                print_tasks(&tasks, OutputFormat::resolve(format))
            }
            TasksCommand::Show { id, format } => {
                let view = Arc::new(TaskView::new(deck.backend()));
                let on_interrupt = Arc::clone(&view);
                if let Err(e) = ctrlc::set_handler(move || on_interrupt.close()) {
                    tracing::debug!(error = %e, "ctrl-c handler not installed");
                }
                view.open(&id).map_err(|e| deck.fail(e))?;
                // Closed between load and print.
                let detail = view.current().ok_or(ExitError::Cancelled)?;
                print_detail(&detail, OutputFormat::resolve(format))
            }
            TasksCommand::Create {
                title,
                issue_type,
                priority,
                description,
                project,
                labels,
                depends_on,
                format,
            } => {
                let new = NewTask {
                    title,
                    description,
                    issue_type,
                    priority,
                    project,
                    labels,
                    depends_on,
                };
                new.validate().map_err(ExitError::Validation)?;
                let task = api.create_task(&new).map_err(|e| deck.fail(e))?;
                deck.events.publish(&TaskEvent::Created { id: task.id.clone() });
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&task)?,
                    _ => println!("{}", task.id),
                }
                Ok(())
            }
            TasksCommand::Edit {
                id,
                title,
                description,
                status,
                priority,
                issue_type,
                assignee,
                labels,
                interactive,
            } => {
                let task = api.get_task(&id).map_err(|e| deck.fail(e))?;
                let mut edits: Vec<Edit> = [
                    title.map(Edit::Title),
                    description.map(Edit::Description),
                    status.map(Edit::Status),
                    priority.map(Edit::Priority),
                    issue_type.map(Edit::Type),
                    assignee.map(|a| Edit::Assignee(Some(a).filter(|a| !a.is_empty()))),
                    labels.map(Edit::Labels),
                ]
                .into_iter()
                .flatten()
                .collect();
                if interactive {
                    edits.extend(prompt_edits(&task)?);
                }
                if edits.is_empty() {
                    return Err(ExitError::Validation("nothing to edit".into()).into());
                }
                edit_task(&deck, &task, edits)
            }
            TasksCommand::Delete { id, yes } => {
                if !yes && !prompt_confirm(&format!("Delete {id}? This cannot be undone"), false)? {
                    return Err(ExitError::Cancelled.into());
                }
                api.delete_task(&id).map_err(|e| deck.fail(e))?;
                deck.events.publish(&TaskEvent::Deleted { id: id.clone() });
                StderrNotifier.notify(Notice::success(format!("deleted {id}")));
                Ok(())
            }
            TasksCommand::History { id, format } => {
                let history = api.task_history(&id).map_err(|e| deck.fail(e))?;
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&history)?,
                    _ => {
                        for event in &history {
                            let actor = event.actor.as_deref().unwrap_or("-");
                            println!(
                                "{}  {:<8} {:<12} {}",
                                event.timestamp, event.kind, actor, event.summary
                            );
                        }
                    }
                }
                Ok(())
            }
            TasksCommand::Images { id, format } => {
                let images = api.task_images(&id).map_err(|e| deck.fail(e))?;
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&images)?,
                    _ => {
                        for image in &images {
                            println!("{}", image.path);
                        }
                    }
                }
                Ok(())
            }
            TasksCommand::Attach { id, file } => {
                if !file.is_file() {
                    let reason = format!("{} is not a file", file.display());
                    return Err(ExitError::Validation(reason).into());
                }
                let uploaded = api.upload_image(&file).map_err(|e| deck.fail(e))?;
                let images = api.attach_image(&id, &uploaded.path).map_err(|e| deck.fail(e))?;
                deck.events.publish(&TaskEvent::Updated { id: id.clone() });
                StderrNotifier.notify(Notice::success(format!(
                    "attached {} to {id} ({} image(s))",
                    uploaded.path,
                    images.len()
                )));
                Ok(())
            }
            TasksCommand::Logs { id, file: Some(file), .. } => {
                let content = api.task_log(&id, &file).map_err(|e| deck.fail(e))?;
                print!("{content}");
                Ok(())
            }
            TasksCommand::Logs { id, file: None, format } => {
                let logs = api.task_logs(&id).map_err(|e| deck.fail(e))?;
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&logs)?,
                    _ => {
                        for log in &logs {
                            let modified = log.modified.as_deref().unwrap_or("");
                            println!("{:<40} {:>10}  {modified}", log.file, log.size);
                        }
                    }
                }
                Ok(())
            }
            TasksCommand::Replace { id, file, format } => {
                let raw = if file.as_os_str() == "-" {
                    std::io::read_to_string(std::io::stdin())
                        .context("reading task JSON from stdin")?
                } else {
                    std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?
                };
                let task = task_from_json(&raw, &id)?;
                let saved = api.replace_task(&task).map_err(|e| deck.fail(e))?;
                deck.events.publish(&TaskEvent::Updated { id: saved.id.clone() });
                match OutputFormat::resolve(format) {
                    OutputFormat::Json => print_json(&saved)?,
                    _ => println!("{}", saved.id),
                }
                Ok(())
            }
            TasksCommand::Migrate { id, project } => {
                let result = api.migrate_task(&id, &project).map_err(|e| deck.fail(e))?;
                deck.events
                    .publish(&TaskEvent::Migrated { old_id: id, new_id: result.new_id.clone() });
                println!("{}", result.new_id);
                Ok(())
            }
            TasksCommand::Ready { format } => {
                let tasks = api.ready_tasks().map_err(|e| deck.fail(e))?;
                print_tasks(&tasks, OutputFormat::resolve(format))
            }
            TasksCommand::Deps { command } => command.execute(&deck),
        }
    }
}

/// Parse a full task for `PUT`. A missing id is taken from `id`; a
/// different one is rejected.
fn task_from_json(raw: &str, id: &str) -> Result<Task, ExitError> {
    let mut value: serde_json::Value = serde_json::from_str(raw).map_err(invalid_json)?;
    let Some(object) = value.as_object_mut() else {
        return Err(ExitError::Validation("task JSON must be an object".into()));
    };
    match object.get("id").and_then(serde_json::Value::as_str) {
        Some(found) if found != id => {
            return Err(ExitError::Validation(format!("file describes {found}, not {id}")));
        }
        Some(_) => {}
        None => {
            object.insert("id".into(), id.into());
        }
    }
    let task: Task = serde_json::from_value(value).map_err(invalid_json)?;
    validate_fields(&task.title, &task.issue_type, task.priority).map_err(ExitError::Validation)?;
    Ok(task)
}

fn invalid_json(e: serde_json::Error) -> ExitError {
    ExitError::Validation(format!("invalid task JSON: {e}"))
}

impl DepsCommand {
    fn execute(self, deck: &Deck) -> anyhow::Result<()> {
        let api = deck.api();
        match self {
            DepsCommand::Candidates { id, format } => {
                let task = api.get_task(&id).map_err(|e| deck.fail(e))?;
                let candidates = deps::fetch_candidates(api, &task).map_err(|e| deck.fail(e))?;
                print_tasks(&candidates, OutputFormat::resolve(format))
            }
            DepsCommand::Add { id, dependency } => {
                let task = api.get_task(&id).map_err(|e| deck.fail(e))?;
                let updated =
                    deps::add_dependency(api, &task, &dependency).map_err(|e| deck.fail(e))?;
                println!("{}: depends on {}", updated.id, updated.depends_on.join(", "));
                Ok(())
            }
            DepsCommand::Remove { id, dependency } => {
                let task = api.get_task(&id).map_err(|e| deck.fail(e))?;
                let updated =
                    deps::remove_dependency(api, &task, &dependency).map_err(|e| deck.fail(e))?;
                if updated.depends_on.is_empty() {
                    println!("{}: no dependencies", updated.id);
                } else {
                    println!("{}: depends on {}", updated.id, updated.depends_on.join(", "));
                }
                Ok(())
            }
        }
    }
}

/// Ask for new values of the common fields, keeping unchanged answers out.
fn prompt_edits(task: &Task) -> anyhow::Result<Vec<Edit>> {
    let mut edits = Vec::new();
    let title = prompt_input("Title", &task.title)?;
    if title != task.title {
        edits.push(Edit::Title(title));
    }
    let description = prompt_input("Description", &task.description)?;
    if description != task.description {
        edits.push(Edit::Description(description));
    }
    let priority = prompt_input("Priority (0-4)", &task.priority.to_string())?;
    match priority.trim().parse::<u8>() {
        Ok(p) if p != task.priority => edits.push(Edit::Priority(p)),
        Ok(_) => {}
        Err(_) => {
            let reason = format!("priority must be a number, got '{priority}'");
            return Err(ExitError::Validation(reason).into());
        }
    }
    Ok(edits)
}

/// Apply edits through the auto-saver and wait for them to land.
fn edit_task(deck: &Deck, task: &Task, edits: Vec<Edit>) -> anyhow::Result<()> {
    let saved = deck.events.subscribe();
    let saver = AutoSaver::spawn(
        deck.backend(),
        task,
        deck.config.debounce(),
        Arc::new(StderrNotifier),
        Some(Arc::clone(&deck.events)),
    );
    for edit in edits {
        saver.edit(edit);
    }
    saver.flush().map_err(|e| deck.fail(e))?;
    let fields = saver.displayed();
    saver.close();

    if saved.try_recv().is_ok() {
        println!("{}  [{}] P{}  {}", task.id, fields.status, fields.priority, fields.title);
    }
    Ok(())
}

fn print_tasks(tasks: &[Task], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(tasks)?,
        OutputFormat::Text => {
            for t in tasks {
                println!(
                    "task  id={}  status={}  priority={}  type={}  title={}",
                    t.id, t.status, t.priority, t.issue_type, t.title
                );
            }
        }
        OutputFormat::Pretty => {
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for t in tasks {
                println!(
                    "{:<12} {:<12} P{}  {:<8} {}",
                    t.id,
                    t.status.as_str(),
                    t.priority,
                    t.issue_type,
                    truncate(&t.title, 60)
                );
            }
        }
    }
    Ok(())
}

fn print_detail(detail: &TaskDetail, format: OutputFormat) -> anyhow::Result<()> {
    let t = &detail.task;
    match format {
        OutputFormat::Json => return print_json(detail),
        OutputFormat::Text => {
            println!(
                "task  id={}  status={}  priority={}  type={}",
                t.id, t.status, t.priority, t.issue_type
            );
            println!("title  {}", t.title);
            if !t.depends_on.is_empty() {
                println!("depends-on  {}", t.depends_on.join(","));
            }
            println!("history  count={}", detail.history.len());
            println!("images  count={}", detail.images.len());
            println!("logs  count={}", detail.logs.len());
        }
        OutputFormat::Pretty => {
            println!("=== {} · {} ===\n", t.id, t.title);
            println!("Status: {}  Priority: P{}  Type: {}", t.status, t.priority, t.issue_type);
            if let Some(assignee) = &t.assignee {
                println!("Assignee: {assignee}");
            }
            if !t.labels.is_empty() {
                println!("Labels: {}", t.labels.join(", "));
            }
            if !t.depends_on.is_empty() {
                println!("Depends on: {}", t.depends_on.join(", "));
            }
            if !t.blocked_by.is_empty() {
                println!("Blocked by: {}", t.blocked_by.join(", "));
            }
            if !t.description.trim().is_empty() {
                println!();
                let skin = termimad::MadSkin::default();
                print!("{}", skin.term_text(&t.description));
            }
            if !detail.history.is_empty() {
                println!("\nHistory:");
                for event in detail.history.iter().rev().take(10) {
                    println!("  {}  {}", event.timestamp, event.summary);
                }
            }
            if !detail.images.is_empty() {
                println!("\nImages: {}", detail.images.len());
            }
            if !detail.logs.is_empty() {
                println!("\nSession logs:");
                for log in &detail.logs {
                    println!("  {}", log.file);
                }
            }
        }
    }
    for warning in &detail.warnings {
        StderrNotifier.notify(Notice::warning(warning.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_takes_id_from_argument() {
        let raw = r#"{"title":"Rewrite","type":"bug","priority":1}"#;
        let task = task_from_json(raw, "web-4").unwrap();
        assert_eq!(task.id, "web-4");
        assert_eq!(task.issue_type, "bug");
        assert_eq!(task.priority, 1);
    }

    #[test]
    fn replacement_rejects_other_task_or_bad_fields() {
        let raw = r#"{"id":"web-5","title":"x","type":"task"}"#;
        let err = task_from_json(raw, "web-4").unwrap_err();
        assert!(err.to_string().contains("web-5"));

        let err = task_from_json(r#"{"title":"","type":"task"}"#, "web-4").unwrap_err();
        assert_eq!(err.to_string(), "title is required");

        assert!(task_from_json("[1, 2]", "web-4").is_err());
        assert!(task_from_json("{not json", "web-4").is_err());
    }
}

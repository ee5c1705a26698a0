// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use timetracker::{
    archive::default_backup_name,
    path::expand_path,
    record::Record,
    settings::{option, OPTIONS},
    RecordEdit, RecordRef, Tracker,
};

use anyhow::{bail, Result};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{path::PathBuf, process::exit, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "timetracker [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Application root to use instead of the default.
    #[arg(short, long, global = true, value_name = "dir")]
    pub root: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let tracker = match self.root {
            Some(root) => Tracker::open(expand_path(root)?)?,
            None => Tracker::open_default()?,
        };

        match self.command {
            Command::Start(opts) => run_start(&tracker, opts),
            Command::Stop => run_stop(&tracker),
            Command::Status => run_status(&tracker),
            Command::List(opts) => run_list(&tracker, opts),
            Command::Add(opts) => run_add(&tracker, opts),
            Command::Edit(opts) => run_edit(&tracker, opts),
            Command::Delete(opts) => run_delete(&tracker, opts),
            Command::Export(opts) => run_export(tracker, opts).await,
            Command::Import(opts) => run_import(tracker, opts).await,
            Command::Projects => run_projects(&tracker),
            Command::Days(opts) => run_days(&tracker, opts),
            Command::Config(opts) => run_config(tracker, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Start timer for a project.
    #[command(override_usage = "timetracker start [options] <project> <description>")]
    Start(StartOptions),

    /// Stop running timer and file it into its day.
    #[command(override_usage = "timetracker stop [options]")]
    Stop,

    /// Show running timer.
    #[command(override_usage = "timetracker status [options]")]
    Status,

    /// List records of a day.
    #[command(override_usage = "timetracker list [options]")]
    List(ListOptions),

    /// Add finished record to a day.
    #[command(override_usage = "timetracker add [options] <project> <description> <start> <end>")]
    Add(AddOptions),

    /// Edit fields of an existing record.
    #[command(override_usage = "timetracker edit [options] <index>")]
    Edit(EditOptions),

    /// Delete record from a day.
    #[command(override_usage = "timetracker delete [options] <index>")]
    Delete(DeleteOptions),

    /// Pack all records into a backup archive.
    #[command(override_usage = "timetracker export [options] [<file>]")]
    Export(ExportOptions),

    /// Restore records from a backup archive.
    #[command(override_usage = "timetracker import [options] <file>")]
    Import(ImportOptions),

    /// List known project names.
    #[command(override_usage = "timetracker projects [options]")]
    Projects,

    /// List days of a month that have records.
    #[command(override_usage = "timetracker days [options] <YYYY-MM>")]
    Days(DaysOptions),

    /// Query or change settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StartOptions {
    /// Project to track time for.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// What is being worked on.
    #[arg(required = true, value_name = "description")]
    pub description: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Day to list instead of today.
    #[arg(short, long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Project of the record.
    #[arg(required = true, value_name = "project")]
    pub project: String,

    /// Description of the record.
    #[arg(required = true, value_name = "description")]
    pub description: String,

    /// Start time in hh:mm.
    #[arg(required = true, value_name = "start")]
    pub start: String,

    /// End time in hh:mm.
    #[arg(required = true, value_name = "end")]
    pub end: String,

    /// Day to add record to instead of today.
    #[arg(short, long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct EditOptions {
    /// Position of record as shown by list.
    #[arg(required = true, value_name = "index")]
    pub index: usize,

    /// Day holding record instead of today.
    #[arg(short, long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// New project.
    #[arg(short, long, value_name = "project")]
    pub project: Option<String>,

    /// New description.
    #[arg(short = 'm', long, value_name = "description")]
    pub description: Option<String>,

    /// New start time in hh:mm.
    #[arg(short, long, value_name = "start")]
    pub start: Option<String>,

    /// New end time in hh:mm.
    #[arg(short, long, value_name = "end")]
    pub end: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeleteOptions {
    /// Position of record as shown by list.
    #[arg(required = true, value_name = "index")]
    pub index: usize,

    /// Day holding record instead of today.
    #[arg(short, long, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExportOptions {
    /// Backup file to write, defaults to dated name in current directory.
    #[arg(value_name = "file")]
    pub file: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ImportOptions {
    /// Backup file to restore from.
    #[arg(required = true, value_name = "file")]
    pub file: PathBuf,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DaysOptions {
    /// Month to search.
    #[arg(required = true, value_name = "YYYY-MM", value_parser = parse_month)]
    pub month: NaiveDate,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print value of a setting.
    Get {
        #[arg(value_name = "key")]
        key: String,
    },

    /// Change value of a setting.
    Set {
        #[arg(value_name = "key")]
        key: String,

        #[arg(value_name = "value")]
        value: String,
    },

    /// Print every setting.
    List,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_start(tracker: &Tracker, opts: StartOptions) -> Result<()> {
    let record = tracker.start_timer(opts.project, opts.description, Local::now())?;
    if let Some(start) = record.start {
        info!("timer started at {}", start.format("%H:%M"));
    }

    Ok(())
}

fn run_stop(tracker: &Tracker) -> Result<()> {
    let (at, record) = tracker.stop_timer(Local::now())?;
    info!("filed as record {at}");
    println!("{}", render_record(at.index, &record));

    Ok(())
}

fn run_status(tracker: &Tracker) -> Result<()> {
    match tracker.running()? {
        Some(record) => {
            let elapsed = record.start.map(|start| Local::now() - start);
            println!(
                "running: {} ({}) since {}, {} elapsed",
                record.project,
                record.description,
                render_time(record.start),
                elapsed.map(render_duration).unwrap_or_default()
            );
        }
        None => println!("no timer running"),
    }

    Ok(())
}

fn run_list(tracker: &Tracker, opts: ListOptions) -> Result<()> {
    let date = opts.date.unwrap_or_else(today);
    let load = tracker.list_day(date)?;

    let mut total = chrono::Duration::zero();
    for (index, record) in load.records.iter().enumerate() {
        println!("{}", render_record(index, record));
        total += record.duration().unwrap_or_else(chrono::Duration::zero);
    }

    for malformed in &load.warnings {
        warn!("line {} is malformed: {}", malformed.line_number, malformed.error);
    }

    println!("{date}: {} record(s), {} total", load.records.len(), render_duration(total));

    Ok(())
}

fn run_add(tracker: &Tracker, opts: AddOptions) -> Result<()> {
    let date = opts.date.unwrap_or_else(today);
    let at = tracker.add_record(date, opts.project, opts.description, &opts.start, &opts.end)?;
    info!("added record {at}");

    Ok(())
}

fn run_edit(tracker: &Tracker, opts: EditOptions) -> Result<()> {
    let at = RecordRef::new(opts.date.unwrap_or_else(today), opts.index);
    let edit = RecordEdit {
        project: opts.project,
        description: opts.description,
        start: opts.start,
        end: opts.end,
    };
    if edit.is_empty() {
        bail!("nothing to edit, pass at least one field to change");
    }

    let record = tracker.edit_record(at, edit)?;
    println!("{}", render_record(at.index, &record));

    Ok(())
}

fn run_delete(tracker: &Tracker, opts: DeleteOptions) -> Result<()> {
    let at = RecordRef::new(opts.date.unwrap_or_else(today), opts.index);
    if !opts.yes && !tracker.preferences().skip_confirm {
        let confirmed = Confirm::new(&format!("Delete record {at}?"))
            .with_default(false)
            .prompt()?;
        if !confirmed {
            info!("delete cancelled");
            return Ok(());
        }
    }

    let record = tracker.delete_record(at)?;
    info!("deleted {:?} ({:?})", record.project, record.description);

    Ok(())
}

async fn run_export(tracker: Tracker, opts: ExportOptions) -> Result<()> {
    let file = opts
        .file
        .unwrap_or_else(|| PathBuf::from(default_backup_name(today())));

    let bar = spinner("export")?;
    let worker = bar.clone();
    let target = file.clone();
    let result = tokio::task::spawn_blocking(move || tracker.export_backup(target, worker)).await;
    bar.finish_and_clear();

    let summary = result??;
    info!(
        "exported {} file(s) ({} bytes) to {:?}",
        summary.files,
        summary.bytes,
        file.display()
    );

    Ok(())
}

async fn run_import(tracker: Tracker, opts: ImportOptions) -> Result<()> {
    if !opts.yes && !tracker.preferences().skip_confirm {
        let confirmed = Confirm::new("Files from the backup replace existing ones. Continue?")
            .with_default(false)
            .prompt()?;
        if !confirmed {
            info!("import cancelled");
            return Ok(());
        }
    }

    let bar = spinner("import")?;
    let worker = bar.clone();
    let file = opts.file.clone();
    let result = tokio::task::spawn_blocking(move || tracker.import_backup(file, worker)).await;
    bar.finish_and_clear();

    let summary = result??;
    info!(
        "imported {} file(s) from {:?}",
        summary.files,
        opts.file.display()
    );

    Ok(())
}

fn run_projects(tracker: &Tracker) -> Result<()> {
    for project in tracker.projects()? {
        println!("{project}");
    }

    Ok(())
}

fn run_days(tracker: &Tracker, opts: DaysOptions) -> Result<()> {
    for date in tracker.recorded_days(opts.month.year(), opts.month.month())? {
        println!("{date}");
    }

    Ok(())
}

fn run_config(mut tracker: Tracker, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Get { key } => {
            let value = match tracker.get_setting(&key)? {
                Some(value) => value,
                None => match option(&key) {
                    Some(option) => option.default.to_string(),
                    None => bail!("setting {key:?} is not set"),
                },
            };
            println!("{value}");
        }
        ConfigCommand::Set { key, value } => {
            tracker.set_setting(&key, &value)?;
            info!("set {key}={value}");
        }
        ConfigCommand::List => {
            let settings = tracker.settings()?;
            for option in OPTIONS {
                let value = settings
                    .get(option.key)
                    .map_or(option.default, String::as_str);
                println!("{}={value}  # {}", option.key, option.summary);
            }
            for (key, value) in tracker.preferences().extra() {
                println!("{key}={value}");
            }
        }
    }

    Ok(())
}

fn spinner(prefix: &'static str) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template("{spinner:.green} {prefix:.bold} {elapsed_precise:.green}  {msg}")?
        .tick_chars("-\\|/ ");
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_prefix(prefix);
    bar.enable_steady_tick(Duration::from_millis(100));

    Ok(bar)
}

fn parse_month(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
        .map_err(|_| format!("invalid month {value:?}, expected YYYY-MM"))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn render_record(index: usize, record: &Record) -> String {
    format!(
        "{index:>3}  {}-{}  {:>6}  {}  {}",
        render_time(record.start),
        render_time(record.end),
        record.duration().map(render_duration).unwrap_or_default(),
        record.project,
        record.description
    )
}

fn render_time(instant: Option<chrono::DateTime<Local>>) -> String {
    instant.map_or_else(|| "--:--".into(), |instant| instant.format("%H:%M").to_string())
}

fn render_duration(duration: chrono::Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

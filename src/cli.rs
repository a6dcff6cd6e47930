//
// cli.rs
// Dicom-Trolley-Tool-rs
//
// Defines the CLI surface with Clap and dispatches commands to the channel store, the query runner and
// the output formatter.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::channels::ChannelFactory;
use crate::client::{Query, QueryLevel, Searcher, Trolley};
use crate::dicom_access::parse_field_list;
use crate::error::TrolleyToolError;
use crate::logs::configure_logging;
use crate::output::{format_query_results, ResultFormat};
use crate::persistence::{
    default_settings_path, KeyRingStorage, SecretStore, SettingsFile, TrolleyToolSettings,
};
use crate::query::collect_query_results;

/// Fields asked for when the user gives no --include-fields.
const DEFAULT_INCLUDE_FIELDS: [&str; 4] =
    ["PatientID", "PatientBirthDate", "StudyDate", "ModalitiesInStudy"];

/// DICOM Trolley tool - DICOM interaction from the command line.
#[derive(Parser)]
#[command(name = "trolley")]
#[command(about = "DICOM Trolley tool - search and download DICOM studies", long_about = None)]
pub struct Cli {
    /// More log output. Repeat for even more.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Use this settings file instead of ~/.trolleytool/settings.json
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show tool status: settings file and active channels
    Status,
    /// Trolley tool settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Manage ways of querying and retrieving DICOM data
    Channel {
        #[command(subcommand)]
        command: ChannelCommands,
    },
    /// Query DICOM data
    Query {
        #[command(subcommand)]
        command: QueryCommands,
    },
    /// Download DICOM data
    Download {
        #[command(subcommand)]
        command: DownloadCommands,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Print current settings
    Show,
    /// Open the settings file in $EDITOR
    Edit,
}

#[derive(Subcommand)]
pub enum ChannelCommands {
    /// Show all channels
    List,
    /// Show one channel, secrets masked
    Show { name: String },
    /// Store a new channel, replacing any channel with the same name
    Add {
        name: String,
        /// Channel class key: mint, rad69, dicomqr or dicomweb
        #[arg(long)]
        kind: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Channel field as key=value. Repeat for each field
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
    /// Delete a stored channel
    Remove { name: String },
    /// Set channel to use for search
    SetSearcher { name: String },
    /// Set channel to use for download
    SetDownloader { name: String },
}

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Query by StudyInstanceUID
    Suid {
        #[arg(required = true)]
        uids: Vec<String>,
        #[command(flatten)]
        options: QueryOptions,
    },
    /// Query by AccessionNumber
    Acc {
        #[arg(required = true)]
        numbers: Vec<String>,
        #[command(flatten)]
        options: QueryOptions,
    },
    /// Query by PatientID
    #[command(name = "patient_id")]
    PatientId {
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        options: QueryOptions,
    },
}

#[derive(Args, Clone, Debug)]
pub struct QueryOptions {
    #[arg(long, value_enum, ignore_case = true, default_value_t = QueryLevelArg::Study)]
    pub query_level: QueryLevelArg,
    #[arg(long, value_enum, ignore_case = true, default_value_t = OutputFormat::Raw)]
    pub output_format: OutputFormat,
    /// Comma-separated DICOM keywords to ask the server for, like PatientID,StudyDate
    #[arg(long, value_parser = parse_fields)]
    pub include_fields: Option<FieldList>,
    /// Comma-separated DICOM keywords to show in table output
    #[arg(long, value_parser = parse_fields, default_value = "")]
    pub output_fields: FieldList,
}

#[derive(Subcommand)]
pub enum DownloadCommands {
    /// Download by StudyInstanceUID
    Suid {
        uid: String,
        /// Where to write files. Defaults to the system temp directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum QueryLevelArg {
    Study,
    Series,
    Instance,
}

impl From<QueryLevelArg> for QueryLevel {
    fn from(value: QueryLevelArg) -> Self {
        match value {
            QueryLevelArg::Study => QueryLevel::Study,
            QueryLevelArg::Series => QueryLevel::Series,
            QueryLevelArg::Instance => QueryLevel::Instance,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Raw,
    Table,
    Github,
    Csv,
}

impl From<OutputFormat> for ResultFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Raw => ResultFormat::Raw,
            OutputFormat::Table => ResultFormat::Table,
            OutputFormat::Github => ResultFormat::Github,
            OutputFormat::Csv => ResultFormat::Csv,
        }
    }
}

/// Validated list of DICOM keywords.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldList(pub Vec<String>);

fn parse_fields(value: &str) -> Result<FieldList, String> {
    parse_field_list(value)
        .map(FieldList)
        .map_err(|e| e.to_string())
}

fn parse_key_val(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{value}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{value}'"));
    }
    Ok((key.to_string(), val.to_string()))
}

/// Shared objects for CLI commands.
pub struct AppContext {
    settings_file: SettingsFile,
    settings: TrolleyToolSettings,
    storage: Box<dyn SecretStore>,
}

impl AppContext {
    pub fn new(settings_file: SettingsFile, storage: Box<dyn SecretStore>) -> anyhow::Result<Self> {
        let settings = settings_file
            .load_settings()
            .with_context(|| format!("Failed to load settings from {:?}", settings_file.path()))?;
        Ok(Self {
            settings_file,
            settings,
            storage,
        })
    }

    pub fn settings(&self) -> &TrolleyToolSettings {
        &self.settings
    }

    pub fn storage(&self) -> &dyn SecretStore {
        self.storage.as_ref()
    }

    fn save_settings(&self) -> anyhow::Result<()> {
        self.settings_file
            .save(&self.settings)
            .context("Failed to save settings")
    }

    fn searcher(&self) -> anyhow::Result<Box<dyn Searcher>> {
        let name = &self.settings.searcher_name;
        let channel = self
            .storage
            .load_channel(name)
            .with_context(|| format!("Could not load searcher channel '{name}'"))?;
        Ok(channel.init_searcher()?)
    }

    fn trolley(&self) -> anyhow::Result<Trolley> {
        Trolley::from_settings(&self.settings, self.storage.as_ref())
            .context("Could not set up searcher and downloader from settings")
    }
}

pub fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    let settings_path = match cli.settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let mut context = AppContext::new(
        SettingsFile::new(settings_path),
        Box::new(KeyRingStorage::default()),
    )?;
    execute(cli.command, &mut context)
}

pub fn execute(command: Commands, context: &mut AppContext) -> anyhow::Result<()> {
    match command {
        Commands::Status => status(context),
        Commands::Settings { command } => match command {
            SettingsCommands::Show => {
                println!("{}", context.settings.to_json()?);
                Ok(())
            }
            SettingsCommands::Edit => edit_settings(context.settings_file.path()),
        },
        Commands::Channel { command } => channel(command, context),
        Commands::Query { command } => query(command, context),
        Commands::Download { command } => match command {
            DownloadCommands::Suid { uid, output_dir } => {
                let output_dir = output_dir.unwrap_or_else(std::env::temp_dir);
                download_suid(context, &uid, &output_dir)
            }
        },
    }
}

fn status(context: &AppContext) -> anyhow::Result<()> {
    println!("Status");
    println!("Settings file at {:?}", context.settings_file.path());
    for (role, name) in [
        ("searcher", &context.settings.searcher_name),
        ("downloader", &context.settings.downloader_name),
    ] {
        match context.storage.load_channel(name) {
            Ok(channel) => println!(
                "{role}: '{}' ({})",
                name,
                ChannelFactory::class_key(&channel)?
            ),
            Err(e) => println!("{role}: '{name}' (unavailable: {e})"),
        }
    }
    println!(
        "query missing: {}",
        context.settings.query_missing.unwrap_or(true)
    );
    Ok(())
}

fn edit_settings(path: &Path) -> anyhow::Result<()> {
    let editor = std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string());
    debug!("Opening {:?} with '{}'", path, editor);
    let status = Command::new(&editor)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to launch editor '{editor}'"))?;
    if !status.success() {
        bail!("Editor '{}' exited with {}", editor, status);
    }
    Ok(())
}

fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn channel(command: ChannelCommands, context: &mut AppContext) -> anyhow::Result<()> {
    match command {
        ChannelCommands::List => {
            println!("Channels:");
            for name in &context.settings.channels {
                let mut roles = Vec::new();
                if *name == context.settings.searcher_name {
                    roles.push("searcher");
                }
                if *name == context.settings.downloader_name {
                    roles.push("downloader");
                }
                let summary = match context.storage.load_channel(name) {
                    Ok(channel) => {
                        let class_key = ChannelFactory::class_key(&channel)?;
                        match channel.description() {
                            "" => format!("[{class_key}]"),
                            description => format!("[{class_key}] {description}"),
                        }
                    }
                    Err(e) => format!("[unavailable: {e}]"),
                };
                if roles.is_empty() {
                    println!("  {name} {summary}");
                } else {
                    println!("  {name} {summary} ({})", roles.join(", "));
                }
            }
        }
        ChannelCommands::Show { name } => {
            let channel = context
                .storage
                .load_channel(&name)
                .with_context(|| format!("Could not load channel '{name}'"))?;
            let mut record = channel.masked_record()?;
            record.insert(
                "class_key".to_string(),
                Value::String(ChannelFactory::class_key(&channel)?.to_string()),
            );
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ChannelCommands::Add {
            name,
            kind,
            description,
            params,
        } => {
            let kind = ChannelFactory::channel_kind(&kind)?;
            let mut record: Map<String, Value> = params
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            record.insert("key".to_string(), Value::String(name.clone()));
            record.insert("description".to_string(), Value::String(description));
            let channel = kind
                .build(record)
                .map_err(|e| anyhow!("Invalid fields for channel '{name}': {e}"))?;

            context
                .storage
                .save_channel(&name, &channel)
                .with_context(|| format!("Could not store channel '{name}'"))?;
            context.settings.remember_channel(&name);
            context.save_settings()?;
            println!(
                "Stored {} channel '{}'",
                ChannelFactory::class_key(&channel)?,
                name
            );
        }
        ChannelCommands::Remove { name } => {
            context
                .storage
                .delete(&name)
                .with_context(|| format!("Could not remove channel '{name}'"))?;
            context.settings.forget_channel(&name);
            context.save_settings()?;
            if name == context.settings.searcher_name || name == context.settings.downloader_name {
                warn!("Removed channel '{}' is still set as searcher or downloader", name);
            }
            println!("Removed channel '{name}'");
        }
        ChannelCommands::SetSearcher { name } => {
            let channel = context
                .storage
                .load_channel(&name)
                .with_context(|| format!("Could not load channel '{name}'"))?;
            if !channel.can_search() {
                bail!("Channel '{}' cannot be used for search", name);
            }
            context.settings.searcher_name = name.clone();
            context.save_settings()?;
            println!("Set searcher to '{name}'");
        }
        ChannelCommands::SetDownloader { name } => {
            let channel = context
                .storage
                .load_channel(&name)
                .with_context(|| format!("Could not load channel '{name}'"))?;
            if !channel.can_download() {
                bail!("Channel '{}' cannot be used for download", name);
            }
            context.settings.downloader_name = name.clone();
            context.save_settings()?;
            println!("Set downloader to '{name}'");
        }
    }
    Ok(())
}

/// Queries for the values of a query subcommand, plus the options shared by all of them.
pub fn build_queries(command: QueryCommands) -> (Vec<Query>, QueryOptions) {
    let (queries, options): (Vec<Query>, QueryOptions) = match command {
        QueryCommands::Suid { uids, options } => {
            (uids.into_iter().map(Query::by_study_uid).collect(), options)
        }
        QueryCommands::Acc { numbers, options } => (
            numbers.into_iter().map(Query::by_accession_number).collect(),
            options,
        ),
        QueryCommands::PatientId { ids, options } => {
            (ids.into_iter().map(Query::by_patient_id).collect(), options)
        }
    };
    let include_fields: Vec<String> = match &options.include_fields {
        Some(FieldList(fields)) => fields.clone(),
        None => DEFAULT_INCLUDE_FIELDS.iter().map(|f| f.to_string()).collect(),
    };
    let queries = queries
        .into_iter()
        .map(|query| {
            query
                .with_level(options.query_level.into())
                .with_include_fields(include_fields.clone())
        })
        .collect();
    (queries, options)
}

fn query(command: QueryCommands, context: &AppContext) -> anyhow::Result<()> {
    let (queries, options) = build_queries(command);
    let format: ResultFormat = options.output_format.into();
    if format == ResultFormat::Csv {
        return Err(TrolleyToolError::NotImplemented(
            "CSV output. Use --output-format table".into(),
        )
        .into());
    }
    let searcher = context.searcher()?;
    info!("Running {} queries", queries.len());
    let results = collect_query_results(searcher.as_ref(), queries);
    let text = format_query_results(&results, format, Some(&options.output_fields.0), None)
        .context("Failed to format query results")?;
    println!("{text}");
    Ok(())
}

fn download_suid(context: &AppContext, uid: &str, output_dir: &Path) -> anyhow::Result<()> {
    let trolley = context.trolley()?;
    let study = trolley
        .find_study(&Query::by_study_uid(uid))
        .with_context(|| format!("Could not find study {uid}"))?;
    let written = trolley
        .download(&study, output_dir)
        .with_context(|| format!("Download of study {uid} failed"))?;
    println!("Downloaded {} file(s) to {:?}", written.len(), output_dir);
    for (series, count) in files_per_folder(output_dir, &written) {
        println!("  {series}: {count} file(s)");
    }
    Ok(())
}

/// Number of written files in each folder, by folder path relative to `root`. Files outside `root`
/// are counted under their full folder path.
pub fn files_per_folder(root: &Path, written: &[PathBuf]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for path in written {
        let folder = path.parent().unwrap_or_else(|| Path::new(""));
        let folder = folder.strip_prefix(root).unwrap_or(folder);
        *counts.entry(folder.display().to_string()).or_insert(0) += 1;
    }
    counts
}

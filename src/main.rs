//! gauge_daq station CLI
//!
//! Command-line shell over the acquisition core: catalog management, an
//! interactive measurement session fed by the keyboard and optionally a
//! serial gauge, and history/statistics views.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gauge_daq::adapters::SerialAdapter;
use gauge_daq::config::Settings;
use gauge_daq::device::{DeviceChannel, PollEvent, SamplePoller};
use gauge_daq::export::export_history;
use gauge_daq::history::{measurement_summary, BucketPolicy, HistoryBuilder, HistoryTable};
use gauge_daq::models::{ModelId, NewModel, NewParameter, ParameterId, TemplateId, TimeRange};
use gauge_daq::sequencer::{ParameterSequencer, SubmitOutcome};
use gauge_daq::store::{run_blocking, CatalogStore, MeasurementStore, SqliteStore};
use gauge_daq::templates::TemplateLibrary;
use gauge_daq::{error::DaqError, logging};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

/// Measurement station for serial gauges
#[derive(Parser)]
#[command(name = "gauge_daq")]
#[command(about = "Record gauge measurements per product model and review their history")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to gauge.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    InitDb,

    /// List serial ports available on this host
    Ports,

    /// Ask a gauge to describe itself
    DeviceInfo {
        /// Serial port, e.g. COM3 or /dev/ttyUSB0
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Manage product models
    #[command(subcommand)]
    Model(ModelCommand),

    /// Manage parameters of a model
    #[command(subcommand)]
    Param(ParamCommand),

    /// Manage report templates
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Measure units of a model, one value per parameter
    Measure {
        /// Model id
        #[arg(short, long)]
        model: i64,

        /// Read values from the gauge on this port as well as the keyboard
        #[arg(short, long)]
        port: Option<String>,
    },

    /// Show measured products of a model, newest first
    History {
        /// Model id
        #[arg(short, long)]
        model: i64,

        /// Maximum number of products
        #[arg(short, long)]
        limit: Option<usize>,

        /// Also write the table to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent measurements of all models
    Latest {
        /// Number of measurements
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Statistics of one parameter
    Stats {
        /// Parameter id
        #[arg(short, long)]
        parameter: i64,

        /// Only include the last N days
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Measurements per day
    Summary {
        /// Number of days to include
        #[arg(short, long, default_value = "7")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum ModelCommand {
    /// Add a model
    Add {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// List models
    List,
    /// Rename a model or change its description
    Update {
        id: i64,
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Delete a model and its parameters
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ParamCommand {
    /// Add a parameter to a model
    Add {
        #[arg(short, long)]
        model: i64,
        name: String,
        unit: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Advisory lower bound
        #[arg(long, allow_hyphen_values = true)]
        min: Option<f64>,
        /// Advisory upper bound
        #[arg(long, allow_hyphen_values = true)]
        max: Option<f64>,
    },
    /// List the parameters of a model
    List {
        #[arg(short, long)]
        model: i64,
    },
    /// Change a parameter's name, unit or description
    Update {
        id: i64,
        name: String,
        unit: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Delete a parameter
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Copy a template file into the library
    Add { name: String, file: PathBuf },
    /// List templates
    List,
    /// Rename a template
    Update { id: i64, name: String },
    /// Delete a template and its file
    Delete { id: i64 },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(path) = cli.database {
        settings.database.path = path;
    }
    logging::init(&settings.application.log_level);
    info!("{} starting", settings.application.name);

    match cli.command {
        Commands::InitDb => {
            let store = SqliteStore::open(settings.database.clone())
                .context("Failed to initialise database")?;
            println!("Database ready at {}", store.path().display());
        }
        Commands::Ports => {
            let channel = DeviceChannel::new(SerialAdapter::new(), settings.device.clone());
            let ports = channel
                .list_available_channels()
                .context("Failed to list serial ports")?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
        }
        Commands::DeviceInfo { port } => device_info(&settings, port).await?,
        Commands::Config => print!("{}", settings.to_toml()?),
        Commands::Model(cmd) => model_command(&open_store(&settings)?, cmd)?,
        Commands::Param(cmd) => param_command(&open_store(&settings)?, cmd)?,
        Commands::Template(cmd) => template_command(&settings, &open_store(&settings)?, cmd)?,
        Commands::Measure { model, port } => measure(&settings, ModelId(model), port).await?,
        Commands::History {
            model,
            limit,
            csv,
            json,
        } => {
            let store = open_store(&settings)?;
            let policy = BucketPolicy::from_config(&settings.history)?;
            let limit = limit.unwrap_or(settings.history.default_limit);
            let table = HistoryBuilder::new(&store, policy)
                .history(ModelId(model), limit)
                .context("Failed to build history")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                print_table(&table);
            }
            if let Some(path) = csv {
                export_history(&table, &path)
                    .with_context(|| format!("Failed to export history to {:?}", path))?;
                println!("Wrote {}", path.display());
            }
        }
        Commands::Latest { count } => {
            let store = open_store(&settings)?;
            let n = count.unwrap_or(settings.history.latest_limit);
            for record in store.latest_n(n)? {
                let m = &record.measurement;
                println!(
                    "{}  {:<16} {:<16} {:>12.3} {:<6} {}",
                    m.measured_at.format("%Y-%m-%d %H:%M:%S"),
                    record.model_name,
                    record.parameter_name,
                    m.value,
                    record.unit,
                    m.device_id.as_deref().unwrap_or("manual"),
                );
            }
        }
        Commands::Stats { parameter, days } => {
            let store = open_store(&settings)?;
            let range = match days {
                Some(days) => TimeRange::last_days(days, Utc::now())
                    .ok_or_else(|| DaqError::InvalidInput(format!("--days {} is too large", days)))?,
                None => TimeRange::all(),
            };
            let policy = BucketPolicy::from_config(&settings.history)?;
            match HistoryBuilder::new(&store, policy).statistics(ParameterId(parameter), range)? {
                Some(stats) => {
                    println!("count  {}", stats.count);
                    println!("min    {:.3}", stats.min);
                    println!("max    {:.3}", stats.max);
                    println!("mean   {:.3}", stats.mean);
                    match stats.std_dev {
                        Some(std) => println!("std    {:.3}", std),
                        None => println!("std    --"),
                    }
                }
                None => println!("No measurements for parameter {}", parameter),
            }
        }
        Commands::Summary { days } => {
            let store = open_store(&settings)?;
            for day in measurement_summary(&store, days, Utc::now())? {
                println!("{}  {}", day.day, day.count);
            }
        }
    }

    Ok(())
}

fn open_store(settings: &Settings) -> Result<SqliteStore> {
    SqliteStore::open(settings.database.clone()).with_context(|| {
        format!(
            "Failed to open database at {}",
            settings.database.path.display()
        )
    })
}

fn resolve_port(settings: &Settings, port: Option<String>) -> Result<String> {
    match port.or_else(|| settings.device.port.clone()) {
        Some(port) => Ok(port),
        None => bail!("No serial port given and device.port is not configured"),
    }
}

async fn device_info(settings: &Settings, port: Option<String>) -> Result<()> {
    let port = resolve_port(settings, port)?;
    let mut channel = DeviceChannel::new(SerialAdapter::new(), settings.device.clone());
    channel
        .open(&port)
        .await
        .with_context(|| format!("Failed to open {}", port))?;
    let info = channel.device_info().await;
    channel.close().await;

    match info? {
        Some(info) => println!("{}", info.render()),
        None => println!("The gauge on {} did not answer INFO", port),
    }
    Ok(())
}

fn model_command(store: &SqliteStore, cmd: ModelCommand) -> Result<()> {
    match cmd {
        ModelCommand::Add {
            name,
            description,
            image,
            template,
        } => {
            let model = store.add_model(&NewModel {
                name,
                description,
                image_path: image,
                template_path: template,
            })?;
            println!("Added model {} '{}'", model.id, model.name);
        }
        ModelCommand::List => {
            for model in store.list_models()? {
                let total = store.count_for_model(model.id)?;
                println!(
                    "{:>4}  {:<24} {:>8} measurements  {}",
                    model.id, model.name, total, model.description
                );
            }
        }
        ModelCommand::Update {
            id,
            name,
            description,
        } => {
            store.update_model(ModelId(id), &name, &description)?;
            println!("Updated model {}", id);
        }
        ModelCommand::Delete { id } => {
            store.delete_model(ModelId(id))?;
            println!("Deleted model {}", id);
        }
    }
    Ok(())
}

fn param_command(store: &SqliteStore, cmd: ParamCommand) -> Result<()> {
    match cmd {
        ParamCommand::Add {
            model,
            name,
            unit,
            description,
            min,
            max,
        } => {
            let mut new = NewParameter::new(ModelId(model), name, unit).with_bounds(min, max);
            new.description = description;
            let parameter = store.add_parameter(&new)?;
            println!("Added parameter {} '{}'", parameter.id, parameter.label());
        }
        ParamCommand::List { model } => {
            for p in store.parameters_for_model(ModelId(model))? {
                let bound = |b: Option<f64>| b.map_or("-".to_string(), |v| v.to_string());
                println!(
                    "{:>4}  {:<24} [{}, {}]  {}",
                    p.id,
                    p.label(),
                    bound(p.min_value),
                    bound(p.max_value),
                    p.description
                );
            }
        }
        ParamCommand::Update {
            id,
            name,
            unit,
            description,
        } => {
            store.update_parameter(ParameterId(id), &name, &unit, &description)?;
            println!("Updated parameter {}", id);
        }
        ParamCommand::Delete { id } => {
            store.delete_parameter(ParameterId(id))?;
            println!("Deleted parameter {}", id);
        }
    }
    Ok(())
}

fn template_command(settings: &Settings, store: &SqliteStore, cmd: TemplateCommand) -> Result<()> {
    let library = TemplateLibrary::new(store, &settings.templates);
    match cmd {
        TemplateCommand::Add { name, file } => {
            let template = library
                .add(&name, &file)
                .with_context(|| format!("Failed to add template from {:?}", file))?;
            println!(
                "Added template {} '{}' at {}",
                template.id,
                template.name,
                template.file_path.display()
            );
        }
        TemplateCommand::List => {
            for t in library.list()? {
                println!("{:>4}  {:<24} {}", t.id, t.name, t.file_path.display());
            }
        }
        TemplateCommand::Update { id, name } => {
            library.rename(TemplateId(id), &name)?;
            println!("Renamed template {} to '{}'", id, name);
        }
        TemplateCommand::Delete { id } => {
            library.delete(TemplateId(id))?;
            println!("Deleted template {}", id);
        }
    }
    Ok(())
}

fn print_table(table: &HistoryTable) {
    if table.is_empty() {
        println!("No measurements");
        return;
    }

    let headers = table.headers();
    let body: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            let mut cells = vec![
                row.index.to_string(),
                row.measured_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ];
            cells.extend(row.display_cells());
            cells
        })
        .collect();

    let widths: Vec<usize> = (0..headers.len())
        .map(|i| {
            body.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(headers[i].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(&headers));
    for (row, cells) in table.rows.iter().zip(&body) {
        if row.is_ambiguous() {
            println!("{}  (check grouping)", line(cells));
        } else {
            println!("{}", line(cells));
        }
    }
}

fn prompt(sequencer: &ParameterSequencer<&SqliteStore>) {
    if let Some(p) = sequencer.current_parameter() {
        let (done, total) = sequencer.progress();
        println!("[{}/{}] {}:", done + 1, total, p.label());
    }
}

fn report(outcome: &SubmitOutcome, sequencer: &mut ParameterSequencer<&SqliteStore>) {
    let recorded = &outcome.recorded;
    let bounds_note = if recorded.within_bounds {
        ""
    } else {
        "  (outside limits)"
    };
    println!("  saved {:.3}{}", recorded.value, bounds_note);
    if outcome.complete {
        println!("Unit complete. Starting the next unit.");
        sequencer.reset();
    }
}

async fn measure(settings: &Settings, model_id: ModelId, port: Option<String>) -> Result<()> {
    let store = open_store(settings)?;
    let model = store
        .get_model(model_id)?
        .ok_or_else(|| DaqError::NotFound(format!("model {}", model_id)))?;
    let parameters = store.parameters_for_model(model_id)?;

    let mut sequencer = ParameterSequencer::new(&store);
    sequencer
        .begin(parameters)
        .with_context(|| format!("Model '{}' has no parameters to measure", model.name))?;

    let mut gauge: Option<(Arc<Mutex<DeviceChannel<SerialAdapter>>>, SamplePoller)> = None;
    let mut events: Option<mpsc::Receiver<PollEvent>> = None;
    if let Some(port) = port {
        let mut channel = DeviceChannel::new(SerialAdapter::new(), settings.device.clone());
        match start_gauge(&mut channel, &port).await {
            Ok(()) => {
                let channel = Arc::new(Mutex::new(channel));
                let (poller, rx) =
                    SamplePoller::spawn(channel.clone(), settings.device.poll_interval());
                gauge = Some((channel, poller));
                events = Some(rx);
                println!("Reading from gauge on {}", port);
            }
            Err(e) => {
                warn!("Gauge unavailable, falling back to manual entry: {}", e);
                println!("Gauge unavailable ({}). Type values instead.", e);
            }
        }
    }

    println!(
        "Measuring model '{}'. Type a value, 'reset' to restart the unit, 'quit' to stop.",
        model.name
    );
    prompt(&sequencer);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                match line.trim() {
                    "" => continue,
                    "quit" | "q" => break,
                    "reset" => {
                        sequencer.reset();
                        println!("Unit restarted.");
                    }
                    raw => match run_blocking(|| sequencer.submit(raw)) {
                        Ok(outcome) => report(&outcome, &mut sequencer),
                        Err(e) => println!("  {}", e),
                    },
                }
                prompt(&sequencer);
            }
            event = next_event(&mut events) => {
                match event {
                    Some(PollEvent::Sample { value, device_id, .. }) => {
                        match run_blocking(|| sequencer.submit_sample(value, &device_id)) {
                            Ok(outcome) => report(&outcome, &mut sequencer),
                            Err(e) => println!("  {}", e),
                        }
                        prompt(&sequencer);
                    }
                    Some(PollEvent::Malformed(e)) => println!("  gauge: {}", e),
                    Some(PollEvent::Failed(e)) => {
                        println!("Gauge stopped ({}). Type values instead.", e);
                        events = None;
                    }
                    None => events = None,
                }
            }
        }
    }

    if let Some((channel, mut poller)) = gauge {
        poller.stop().await;
        let mut channel = channel.lock().await;
        if let Err(e) = channel.request_stop().await {
            warn!("Failed to stop gauge: {}", e);
        }
        channel.close().await;
    }

    let (done, total) = sequencer.progress();
    if done > 0 {
        println!("Stopped with {} of {} values recorded for the current unit.", done, total);
    }
    Ok(())
}

async fn start_gauge(channel: &mut DeviceChannel<SerialAdapter>, port: &str) -> Result<()> {
    channel.open(port).await?;
    channel.request_start().await?;
    Ok(())
}

async fn next_event(events: &mut Option<mpsc::Receiver<PollEvent>>) -> Option<PollEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

//! Command-line entry point: loads the configuration, wires up the
//! field-bus manager and CSV sink, and runs one fetch/append cycle.

use std::process::ExitCode;

use clap::Parser;

use log2csv::config::ConfigNode;
use log2csv::csv_writer::{CsvWriter, CsvWriterConfig};
use log2csv::registry::Registry;
use log2csv::value::{FieldbusError, FieldbusResult};

const DEFAULT_CONFIG: &str = "/etc/log2csv.cnf";

const EXIT_OPTS: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_LOGGING: u8 = 3;
const EXIT_NETWORK: u8 = 4;
const EXIT_OUTFILE: u8 = 5;
const EXIT_LOCAL_SYS: u8 = 6;

const CONFIG_CHANNEL: &str = "channel";
const CONFIG_TITLE: &str = "title";
const CONFIG_OUT_FILE: &str = "outFile";
const CONFIG_FIELD_DELIMITER: &str = "fieldDelimiter";
const CONFIG_TIME_FORMAT: &str = "timeFormat";
const CONFIG_TIME_HEADER: &str = "timeHeader";

/// Periodic CSV data logger for Technische Alternative heating
/// controllers via a D-LOGG gateway.
#[derive(Parser)]
#[command(name = "log2csv", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG)]
    config: String,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            print!("{e}");
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(EXIT_OPTS),
            };
        }
    };

    if env_logger::try_init().is_err() {
        eprintln!("can't initialize logging");
        return ExitCode::from(EXIT_LOGGING);
    }

    match run(&cli.config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run(config_path: &str) -> Result<(), u8> {
    let root = load_config(config_path).map_err(|_| EXIT_CONFIG)?;

    let mut registry = Registry::new();
    registry.init(&root).map_err(|e| {
        log::error!("can't initialize the field-bus manager: {e}");
        EXIT_NETWORK
    })?;

    let channel_list = root.lookup_list(CONFIG_CHANNEL).map_err(|_| EXIT_CONFIG)?;

    let mut titles = Vec::with_capacity(channel_list.len());
    for entry in channel_list {
        let title = entry.lookup_string(CONFIG_TITLE).map_err(|_| EXIT_CONFIG)?;
        titles.push(title.to_string());
        registry.add_channel(entry).map_err(|e| {
            log::error!("can't register channel \"{title}\": {e}");
            EXIT_NETWORK
        })?;
    }

    let out_file = root.lookup_string(CONFIG_OUT_FILE).map_err(|_| EXIT_CONFIG)?;
    let csv_cfg = csv_writer_config(&root, out_file)?;

    let mut writer = CsvWriter::open(&csv_cfg, &titles).map_err(|e| {
        log::error!("can't open the output file \"{out_file}\": {e}");
        EXIT_OUTFILE
    })?;

    process_cycle(&mut registry, &mut writer, titles.len())
}

fn csv_writer_config(root: &ConfigNode, out_file: &str) -> Result<CsvWriterConfig, u8> {
    let mut cfg = CsvWriterConfig::new(out_file.to_string());
    if let Some(d) = root.get(CONFIG_FIELD_DELIMITER).and_then(ConfigNode::as_str) {
        cfg.field_delimiter = d.to_string();
    }
    if let Some(f) = root.get(CONFIG_TIME_FORMAT).and_then(ConfigNode::as_str) {
        cfg.time_format = f.to_string();
    }
    if let Some(h) = root.get(CONFIG_TIME_HEADER).and_then(ConfigNode::as_str) {
        cfg.time_header = h.to_string();
    }
    Ok(cfg)
}

fn process_cycle(registry: &mut Registry, writer: &mut CsvWriter, channel_count: usize) -> Result<(), u8> {
    registry.sync().map_err(|e| {
        log::error!("sync failed: {e}");
        EXIT_NETWORK
    })?;

    let values: Vec<_> = (0..channel_count).map(|id| registry.fetch_value(id)).collect();

    writer.append_row(chrono::Local::now(), &values).map_err(|e| {
        log::error!("can't append the output row: {e}");
        EXIT_OUTFILE
    })?;

    registry.free().map_err(|e| {
        log::error!("teardown reported an error: {e}");
        EXIT_LOCAL_SYS
    })
}

fn load_config(path: &str) -> FieldbusResult<ConfigNode> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        log::error!("can't read configuration file \"{path}\": {e}");
        FieldbusError::Config
    })?;
    let value: toml::Value = toml::from_str(&contents).map_err(|e| {
        log::error!("can't parse configuration file \"{path}\": {e}");
        FieldbusError::Config
    })?;
    ConfigNode::try_from(value)
}

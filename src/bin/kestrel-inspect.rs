//! Read-only inspector for Kestrel database files.
#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use kestrel::primitives::io::{FileIo, StdFileIo};
use kestrel::primitives::pager::closed_cleanly;
use kestrel::primitives::wal::Logger;
use kestrel::storage::dm::{data_path, log_path, LogRecord};
use kestrel::types::page::{PAGE_SIZE, SUPERBLOCK_PAGE};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "kestrel-inspect",
    version,
    about = "Inspect Kestrel database files without modifying them",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Show data file size, page count and the clean-shutdown flag")]
    Info {
        #[arg(value_name = "BASE", help = "Database base path (without .db/.log)")]
        base: PathBuf,
    },
    #[command(about = "Count log records by kind")]
    Log {
        #[arg(value_name = "BASE", help = "Database base path (without .db/.log)")]
        base: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct InfoReport {
    data_file: PathBuf,
    data_bytes: u64,
    pages: u64,
    log_file: PathBuf,
    log_bytes: u64,
    closed_cleanly: bool,
}

#[derive(Debug, Default, Serialize)]
struct LogReport {
    log_file: PathBuf,
    file_bytes: u64,
    valid_bytes: u64,
    records: usize,
    inserts: usize,
    updates: usize,
    super_records: usize,
    transactions: usize,
    highest_page: u32,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Info { base } => {
            let report = info(&base)?;
            emit(cli.format, &report, print_info_text)?;
        }
        Command::Log { base } => {
            let report = scan_log(&base)?;
            emit(cli.format, &report, print_log_text)?;
        }
    }
    Ok(())
}

fn info(base: &Path) -> Result<InfoReport, Box<dyn Error>> {
    let data_file = data_path(base);
    let log_file = log_path(base);
    let io = StdFileIo::open_read_only(&data_file)?;
    let data_bytes = io.len()?;
    if data_bytes < PAGE_SIZE as u64 {
        return Err("data file has no superblock".into());
    }
    let mut superblock = vec![0u8; PAGE_SIZE];
    io.read_at(SUPERBLOCK_PAGE.file_offset(PAGE_SIZE), &mut superblock)?;
    Ok(InfoReport {
        pages: data_bytes / PAGE_SIZE as u64,
        log_bytes: fs::metadata(&log_file)?.len(),
        closed_cleanly: closed_cleanly(&superblock),
        data_file,
        data_bytes,
        log_file,
    })
}

fn scan_log(base: &Path) -> Result<LogReport, Box<dyn Error>> {
    let log_file = log_path(base);
    let logger = Logger::open_read_only(&log_file)?;
    let mut report = LogReport {
        file_bytes: fs::metadata(&log_file)?.len(),
        valid_bytes: logger.len(),
        ..LogReport::default()
    };
    let mut xids = BTreeSet::new();
    for payload in logger.records() {
        let record = LogRecord::decode(&payload?)?;
        report.records += 1;
        match record {
            LogRecord::Insert { .. } => report.inserts += 1,
            LogRecord::Update { .. } => report.updates += 1,
        }
        if record.xid().is_super() {
            report.super_records += 1;
        } else {
            xids.insert(record.xid());
        }
        report.highest_page = report.highest_page.max(record.page().get());
    }
    report.transactions = xids.len();
    report.log_file = log_file;
    Ok(report)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {:.<24} {}", name, value);
}

fn print_info_text(report: &InfoReport) {
    println!("Database");
    print_field("data file", report.data_file.display());
    print_field("data bytes", report.data_bytes);
    print_field("pages", report.pages);
    print_field("log file", report.log_file.display());
    print_field("log bytes", report.log_bytes);
    print_field(
        "shutdown",
        if report.closed_cleanly {
            "clean"
        } else {
            "unclean (recovery on next open)"
        },
    );
}

fn print_log_text(report: &LogReport) {
    println!("Log");
    print_field("log file", report.log_file.display());
    print_field("valid bytes", report.valid_bytes);
    if report.file_bytes > report.valid_bytes {
        print_field("torn tail bytes", report.file_bytes - report.valid_bytes);
    }
    print_field("records", report.records);
    print_field("inserts", report.inserts);
    print_field("updates", report.updates);
    print_field("structural records", report.super_records);
    print_field("transactions", report.transactions);
    print_field("highest page", report.highest_page);
}

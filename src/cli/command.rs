use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use pmdkit::klv::UlChoice;

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for converting and inspecting professional audio metadata",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert metadata between .xml (Serial ADM) and .klv (PMD).
    Convert(ConvertArgs),

    /// Print a model summary as YAML.
    Info(InfoArgs),

    /// Locate and decode a metadata frame in a raw PCM blob.
    Capture(CaptureArgs),
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Input file; the suffix (.xml or .klv) selects the reader.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output file; the suffix selects the writer.
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Universal label for KLV output.
    #[arg(long, value_enum, default_value_t = Ul::Dolby)]
    pub ul: Ul,

    /// Title for the PMD model when converting from Serial ADM.
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input metadata file (.xml or .klv).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Raw interleaved PCM blob.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Number of interleaved channels.
    #[arg(long, value_name = "N")]
    pub channels: usize,

    /// Sample bit depth (24 or 32).
    #[arg(long, default_value_t = 24)]
    pub bit_depth: u8,

    /// Samples are in network byte order.
    #[arg(long)]
    pub big_endian: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Ul {
    /// Dolby private universal label.
    Dolby,
    /// SMPTE ST 2109 universal label.
    Smpte2109,
}

impl Ul {
    pub fn to_choice(self) -> UlChoice {
        match self {
            Ul::Dolby => UlChoice::DolbyPrivate,
            Ul::Smpte2109 => UlChoice::Smpte2109,
        }
    }
}

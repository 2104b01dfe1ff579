use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::core::{
    apdu::Field,
    card::CardHandle,
    config::ReaderConfig,
    format::{format_thai_date, gender_label},
    policy::StatusPolicyKind,
    profile::{read_profile, CardProfile},
    reader::{resolve_reader, CardChannel, PcscReader, ShareModeSetting},
    utils::format_hex_spaced,
};

#[derive(Parser)]
#[command(name = "thaiid-reader")]
#[command(about = "Read Thai national ID cards through a PC/SC smart card reader")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging (every APDU exchanged)
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available PCSC readers
    List {
        /// Show detailed information about readers
        #[arg(short = 'l', long)]
        detailed: bool,
    },

    /// Show the fields that can be read from the card
    Fields,

    /// Read fields (and optionally the photo) from a card
    Read(ReadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Reader name or index (use 'list' to see available readers)
    pub reader: String,

    /// Field to read; repeat for several. Defaults to every field
    #[arg(short, long = "field")]
    pub fields: Vec<Field>,

    /// Print the profile as JSON
    #[arg(long)]
    pub json: bool,

    /// Also read the photo and save it as <CID>.jpg
    #[arg(long)]
    pub photo: bool,

    /// Number of photo segments to read
    #[arg(long)]
    pub segments: Option<usize>,

    /// Directory for the photo file
    #[arg(long)]
    pub photo_dir: Option<PathBuf>,

    /// Fail on non-success status words instead of continuing
    #[arg(long)]
    pub strict: bool,

    /// Connection share mode (exclusive or shared)
    #[arg(short, long)]
    pub mode: Option<ShareModeSetting>,

    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write every APDU exchanged to this JSON file
    #[arg(long)]
    pub transcript: Option<PathBuf>,
}

impl ReadArgs {
    /// Load the config file (if any) and apply command-line overrides.
    pub fn resolve_config(&self) -> Result<ReaderConfig> {
        let mut config = match &self.config {
            Some(path) => ReaderConfig::load(path)?,
            None => ReaderConfig::default(),
        };

        if let Some(segments) = self.segments {
            config.segment_count = segments;
        }
        if let Some(dir) = &self.photo_dir {
            config.photo_dir = dir.clone();
        }
        if self.strict {
            config.status_policy = StatusPolicyKind::Strict;
        }
        if let Some(mode) = self.mode {
            config.share_mode = mode;
        }

        config.validate()?;
        Ok(config)
    }

    /// Fields to read, with the CID added first when the photo needs it.
    pub fn requested_fields(&self) -> Vec<Field> {
        let mut fields = if self.fields.is_empty() {
            Field::ALL.to_vec()
        } else {
            self.fields.clone()
        };
        if self.photo && !fields.contains(&Field::Cid) {
            fields.insert(0, Field::Cid);
        }
        fields
    }
}

pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::List { detailed } => cmd_list(detailed),
        Commands::Fields => cmd_fields(),
        Commands::Read(args) => cmd_read(&args),
    }
}

fn cmd_list(detailed: bool) -> Result<()> {
    let reader = PcscReader::new().context("Failed to initialize PCSC")?;

    let readers = reader.list_readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No PCSC readers found.");
        return Ok(());
    }

    println!("Available PCSC readers:");
    for (i, reader_info) in readers.iter().enumerate() {
        if detailed {
            println!("  [{}] {}", i, reader_info.name);
            println!(
                "      Status: {}",
                if reader_info.card_present {
                    "Card present"
                } else {
                    "No card"
                }
            );
            if let Some(ref atr) = reader_info.atr {
                println!("      ATR: {}", format_hex_spaced(atr));
            }
        } else if reader_info.card_present {
            println!("  [{}] {} [CARD]", i, reader_info.name);
        } else {
            println!("  [{}] {}", i, reader_info.name);
        }
    }

    Ok(())
}

fn cmd_fields() -> Result<()> {
    println!("{:<18} {:<14} INSTRUCTION", "FIELD", "LABEL");
    for field in Field::ALL {
        let command = field.command();
        println!(
            "{:<18} {:<14} {}",
            field.key(),
            command.label,
            format_hex_spaced(&command.instruction)
        );
    }
    Ok(())
}

fn cmd_read(args: &ReadArgs) -> Result<()> {
    let config = args.resolve_config()?;

    let pcsc = PcscReader::new().context("Failed to initialize PCSC")?;
    let readers = pcsc.list_readers().context("Failed to list readers")?;
    let reader_name = resolve_reader(&readers, &args.reader)?;

    let channel = pcsc.channel(&reader_name, config.share_mode)?;
    let mut handle = CardHandle::with_config(channel, &config);

    let result = read_session(&mut handle, args, &config, &reader_name);

    if let Some(path) = &args.transcript {
        write_transcript(&handle, path)?;
    }

    result
}

fn read_session<C: CardChannel>(
    handle: &mut CardHandle<C>,
    args: &ReadArgs,
    config: &ReaderConfig,
    reader_name: &str,
) -> Result<()> {
    handle
        .connect()
        .with_context(|| format!("Failed to connect to reader: {reader_name}"))?;
    let status = handle
        .select_applet()
        .context("Failed to select the ID card applet")?;

    if !args.json {
        println!("Reader: {reader_name}");
        println!("ATR: {}", format_hex_spaced(handle.atr()));
        println!("Select Applet: {status} ({})", status.describe());
        println!();
    }

    let fields = args.requested_fields();
    let profile = read_profile(handle, &fields).context("Failed to read card")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&profile).context("Failed to serialize profile")?
        );
    } else {
        print_profile(&profile, &fields);
    }

    if args.photo {
        let cid = profile.get(Field::Cid).unwrap_or_default();
        let path = handle
            .read_photo(cid, config.segment_count)
            .context("Failed to read photo")?;
        if !args.json {
            println!();
            println!("Photo saved as {}", path.display());
        }
    }

    Ok(())
}

fn print_profile(profile: &CardProfile, fields: &[Field]) {
    for &field in fields {
        let value = profile.get(field).unwrap_or_default();
        match field {
            Field::DateOfBirth | Field::IssueDate | Field::ExpiryDate => {
                println!("{}: {} ({})", field.label(), value, format_thai_date(value));
            }
            Field::Gender => println!("{}: {} ({})", field.label(), value, gender_label(value)),
            _ => println!("{}: {}", field.label(), value),
        }
    }
}

fn write_transcript<C: CardChannel>(handle: &CardHandle<C>, path: &Path) -> Result<()> {
    let json = handle.transcript().export_json()?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write transcript: {}", path.display()))?;

    let stats = handle.transcript().statistics();
    log::info!(
        "Transcript: {} exchanges ({} failed), average {}ms",
        stats.total_exchanges,
        stats.failed_exchanges,
        stats.average_duration_ms
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn read_args(args: &[&str]) -> ReadArgs {
        match parse(args).command {
            Commands::Read(read) => read,
            _ => panic!("Expected read command"),
        }
    }

    #[test]
    fn test_read_defaults() {
        let args = read_args(&["thaiid-reader", "read", "0"]);
        assert_eq!(args.reader, "0");
        assert_eq!(args.requested_fields(), Field::ALL.to_vec());

        let config = args.resolve_config().unwrap();
        assert_eq!(config, ReaderConfig::default());
    }

    #[test]
    fn test_read_overrides() {
        let args = read_args(&[
            "thaiid-reader",
            "read",
            "0",
            "--field",
            "address",
            "--photo",
            "--segments",
            "3",
            "--strict",
            "--mode",
            "shared",
        ]);
        assert_eq!(args.requested_fields(), vec![Field::Cid, Field::Address]);

        let config = args.resolve_config().unwrap();
        assert_eq!(config.segment_count, 3);
        assert_eq!(config.status_policy, StatusPolicyKind::Strict);
        assert_eq!(config.share_mode, ShareModeSetting::Shared);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Cli::try_parse_from(["thaiid-reader", "read", "0", "-f", "nickname"]).is_err());
    }

    #[test]
    fn test_zero_segments_rejected() {
        let args = read_args(&["thaiid-reader", "read", "0", "--segments", "0"]);
        assert!(args.resolve_config().is_err());
    }
}

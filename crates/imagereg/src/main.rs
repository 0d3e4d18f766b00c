use std::process;

use clap::{Parser, Subcommand};
use imagereg_core::{global, Address, BinaryImage};
use imagereg_utils::{debug, LogConfig, LogFormat, LogLevel, LoggingError};
use object::macho::{MH_BUNDLE, MH_DYLIB, MH_DYLINKER, MH_EXECUTE, MH_OBJECT};

/// Inspect the binary images loaded into this process, as a crash reporter sees them.
#[derive(Parser, Debug)]
#[command(name = "imagereg")]
#[command(version)]
#[command(about = "Inspect the binary images loaded into this process, as a crash reporter sees them", long_about = None)]
struct Cli
{
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: pretty or json (overrides IMAGEREG_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// List every registered image in load order
    List
    {
        /// Also show images that have been unloaded
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Show the image containing an address
    At
    {
        /// Address to look up (hex format: 0x1000 or decimal)
        address: String,
    },
    /// Show the first image whose path contains a name
    Named
    {
        /// Path or path fragment
        name: String,
        /// Require the whole path to match
        #[arg(long, default_value_t = false)]
        exact: bool,
    },
    /// Print the build UUID of an image
    BuildId
    {
        /// Path or path fragment
        name: String,
        /// Require the whole path to match
        #[arg(long, default_value_t = false)]
        exact: bool,
    },
    /// Show the main executable image
    Main,
    /// Show the image containing the registry itself
    #[command(name = "self")]
    SelfImage,
}

/// CLI failures
#[derive(Debug, thiserror::Error)]
enum CliError
{
    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("No image found for {0}")]
    NotFound(String),
}

fn main()
{
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<(), CliError>
{
    let mut config = LogConfig::from_env()?;
    if let Some(level) = cli.log_level {
        config.level = Some(level);
    }
    if let Some(format) = cli.log_format {
        config.format = format;
    }
    config.init()?;
    Ok(())
}

fn run_command(command: Commands) -> Result<(), CliError>
{
    global::initialize();
    debug!(images = global::registry().len(), "image registry initialized");

    match command {
        Commands::List { all } => {
            print_image_list(all);
            Ok(())
        }
        Commands::At { address } => {
            let address = parse_address(&address)?;
            let image = global::image_at(address).ok_or_else(|| CliError::NotFound(address.to_string()))?;
            print_image_details(image);
            Ok(())
        }
        Commands::Named { name, exact } => {
            let image = global::image_named(&name, exact).ok_or(CliError::NotFound(name))?;
            print_image_details(image);
            Ok(())
        }
        Commands::BuildId { name, exact } => {
            let build_id = global::build_id_of(&name, exact).ok_or(CliError::NotFound(name))?;
            println!("{build_id}");
            Ok(())
        }
        Commands::Main => {
            let image = global::main_image().ok_or_else(|| CliError::NotFound("the main executable".to_string()))?;
            print_image_details(image);
            Ok(())
        }
        Commands::SelfImage => {
            let image = global::self_image().ok_or_else(|| CliError::NotFound("this binary".to_string()))?;
            print_image_details(image);
            Ok(())
        }
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
fn parse_address(text: &str) -> Result<Address, CliError>
{
    let trimmed = text.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed
        .map(Address::new)
        .map_err(|_| CliError::InvalidAddress(text.to_string()))
}

fn print_image_list(include_unloaded: bool)
{
    let mut shown = 0usize;
    for image in global::all_images() {
        if image.is_unloaded() && !include_unloaded {
            continue;
        }
        let build_id = image
            .build_id()
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let marker = if image.is_unloaded() { " (unloaded)" } else { "" };
        println!(
            "{}  {:<8} {:<12} {:<36}  {}{}",
            image.range(),
            image.architecture(),
            image.version(),
            build_id,
            image.name(),
            marker
        );
        shown += 1;
    }
    println!("\n{shown} images");
}

fn print_image_details(image: &BinaryImage)
{
    println!("\nImage: {}", image.name());
    println!("  Load Address: {}", image.load_address());
    println!("  Static Address: {}", image.static_address());
    println!("  Slide: {:#x}", image.slide());
    println!("  Size: {:#x} bytes", image.size());
    println!("  Architecture: {}", image.architecture());
    println!("  File Type: {}", file_type_name(image.file_type()));
    println!("  Version: {}", image.version());
    match image.build_id() {
        Some(build_id) => println!("  Build ID: {build_id}"),
        None => println!("  Build ID: none"),
    }
    println!("  Unloaded: {}", image.is_unloaded());

    if let Some(record) = image.diagnostic() {
        println!("  Crash Info:");
        let fields = [
            ("Message", &record.message),
            ("Message 2", &record.message2),
            ("Signature", &record.signature),
            ("Backtrace", &record.backtrace),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                println!("    {label}: {value}");
            }
        }
    }
}

fn file_type_name(file_type: u32) -> &'static str
{
    match file_type {
        MH_OBJECT => "object",
        MH_EXECUTE => "executable",
        MH_DYLIB => "dylib",
        MH_DYLINKER => "dylinker",
        MH_BUNDLE => "bundle",
        _ => "other",
    }
}

use clap::{Parser, Subcommand};
use nova_migrate::{
    HypervisorError, NovaError, Result,
    config::{self, MigrateConfig},
    context::{ConnectionInfo, DiskInfo, MigrationContext},
    descriptor::Element,
    downtime, logger, patcher,
    provider::DirectoryDiskProvider,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nova-migrate")]
#[command(about = "Live migration helpers for libvirt guests")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to migration settings (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a domain XML for the destination host
    PatchXml {
        /// Domain XML as dumped on the source (`virsh dumpxml --migratable`)
        #[arg(long)]
        domain: PathBuf,
        /// Migration context (TOML or JSON)
        #[arg(long)]
        context: PathBuf,
        /// Directory of destination disk definitions named `<volume_id>.xml`
        #[arg(long)]
        disk_dir: Option<PathBuf>,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the downtime escalation table for a guest size
    DowntimeSteps {
        /// Guest memory in MiB
        #[arg(long)]
        memory_mb: u64,
        /// Guest disk to copy, in bytes
        #[arg(long, default_value_t = 0)]
        disk_bytes: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        unsafe {
            std::env::set_var("RUST_LOG", "nova_migrate=debug");
        }
    }
    logger::init_logger();

    let config_path = cli.config.clone().unwrap_or_else(MigrateConfig::default_path);
    let config = if config_path.exists() {
        MigrateConfig::from_file(&config_path)?
    } else {
        logger::debug!(
            "Migration settings not found at {}, using defaults",
            config_path.display()
        );
        MigrateConfig::default()
    };

    match cli.command {
        Commands::PatchXml {
            domain,
            context,
            disk_dir,
            output,
        } => {
            let xml = fs::read_to_string(&domain)?;
            let context = load_context(&context)?;

            let patched = match disk_dir {
                Some(dir) => {
                    patcher::get_updated_guest_xml(&xml, &context, &DirectoryDiskProvider::new(dir))?
                }
                None => patcher::get_updated_guest_xml(&xml, &context, &no_destination_disks)?,
            };

            match output {
                Some(path) => {
                    fs::write(&path, patched)?;
                    println!("Patched domain written to {}", path.display());
                }
                None => print!("{}", patched),
            }
        }
        Commands::DowntimeSteps {
            memory_mb,
            disk_bytes,
        } => {
            let data_gb = config::data_gb(memory_mb, disk_bytes);
            let (settings, warnings) = config.migration.normalized();
            for warning in warnings {
                logger::warn!("{}", warning);
            }

            println!("Guest data: {:.2} GiB", data_gb);
            println!(
                "Completion timeout: {}s",
                settings.completion_timeout_for(data_gb)
            );
            println!("{:<14} {:<14}", "AFTER (s)", "DOWNTIME (ms)");
            println!("{}", "=".repeat(28));
            for step in downtime::downtime_steps(&settings, data_gb) {
                println!("{:<14} {:<14}", step.threshold_secs, step.downtime_ms);
            }
        }
    }

    Ok(())
}

fn load_context(path: &Path) -> Result<MigrationContext> {
    let contents = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => MigrationContext::from_json(&contents),
        Some("toml") | None => MigrationContext::from_toml(&contents),
        Some(other) => Err(NovaError::ConfigError(format!(
            "Unsupported context format '{}'",
            other
        ))),
    }
}

fn no_destination_disks(
    _connection_info: &ConnectionInfo,
    disk_info: &DiskInfo,
) -> std::result::Result<Element, HypervisorError> {
    Err(HypervisorError::Other(format!(
        "no disk directory given, keeping {} as is",
        disk_info.dev
    )))
}

use clap::{Parser, Subcommand};
use pppoed::config;
use pppoed::telemetry::init_logging;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pppoed")]
#[command(about = "PPPoE link driver configuration tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show the effective per-link driver configuration
    Show {
        /// Path to config.lock file
        #[arg(short, long, default_value = "config.lock")]
        lock: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate config.lock from config.toml
    Generate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        /// Output path for config.lock
        #[arg(short, long, default_value = "config.lock")]
        output: PathBuf,
    },
    /// Validate config.toml without generating a lock file
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    init_logging(None);

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Generate { config, output } => cmd_config_generate(&config, &output),
            ConfigAction::Validate { config } => cmd_config_validate(&config),
        },
        Commands::Show { lock } => cmd_show(&lock),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

/// Read, parse, and validate a config.toml; both config subcommands go
/// through here so diagnostics look the same everywhere.
fn load_checked(path: &Path) -> Result<(config::Config, String), String> {
    let source =
        std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let cfg: config::Config =
        toml::from_str(&source).map_err(|e| format!("{}: {}", path.display(), e))?;

    let report = config::validate(&cfg);
    report.print_diagnostics();
    if report.has_errors() {
        return Err(format!(
            "{}: {} validation error(s)",
            path.display(),
            report.errors.len()
        ));
    }
    Ok((cfg, source))
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    load_checked(config_path)?;
    println!("[INFO] {} is valid", config_path.display());
    Ok(())
}

fn cmd_config_generate(config_path: &PathBuf, output_path: &PathBuf) -> Result<(), String> {
    let (cfg, source) = load_checked(config_path)?;
    let lock = config::generate_lock(&cfg, &source);

    let mut out = format!(
        "# Generated by pppoed from {} (sha256 {}) - DO NOT EDIT\n\n",
        config_path.display(),
        &lock.source_hash[..12]
    );
    out.push_str(&toml::to_string_pretty(&lock).map_err(|e| e.to_string())?);
    std::fs::write(output_path, out).map_err(|e| format!("{}: {}", output_path.display(), e))?;

    println!(
        "[INFO] wrote {} ({} link(s))",
        output_path.display(),
        lock.links.len()
    );
    Ok(())
}

fn cmd_show(lock_path: &PathBuf) -> Result<(), String> {
    let lock = config::load_lock(lock_path).map_err(|e| format!("Failed to load lock: {}", e))?;

    let mut names: Vec<&String> = lock.links.keys().collect();
    names.sort();
    for name in names {
        let link = &lock.links[name];
        let conf = link
            .to_link_config()
            .map_err(|e| format!("links.{}: {}", name, e))?;
        println!("[{}]", name);
        println!("\tIface Name   : {}", conf.iface);
        println!("\tIface Node   : {}", conf.path);
        println!("\tIface Hook   : {}", conf.hook);
        println!("\tSession      : {}", conf.service);
        println!("\tAC name      : {}", conf.acname);
        println!("\tMax-Payload  : {}", conf.max_payload);
        println!("\tMAC format   : {}", conf.mac_format);
        println!("\tIncoming     : {}", if conf.incoming { "YES" } else { "NO" });
        println!("\tTemplate     : {}", if link.template { "YES" } else { "NO" });
        println!("\tMTU / MRU    : {} / {}", conf.mtu, conf.mru);
    }
    Ok(())
}

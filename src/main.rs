// hibernate-setup - Hibernation provisioning for btrfs + rpm-ostree hosts
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Parser, Subcommand};

use hibernate_setup::config::{Config, Settings};
use hibernate_setup::inspect::SystemInspector;
use hibernate_setup::meminfo::{MemorySource, ProcMeminfo};
use hibernate_setup::provision::{Host, Provisioner};
use hibernate_setup::sizing::target_swap_gib;
use hibernate_setup::swapfile::SwapState;
use hibernate_setup::{error, info, request_shutdown};

#[derive(Parser)]
#[command(name = "hibernate-setup")]
#[command(about = "Set up suspend-then-hibernate with a btrfs swap file")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision swap, SELinux policy, resume arguments and power policy
    Setup,
    /// Show what is in place and what a setup run would change
    Status,
    /// Print the swap size this host needs for hibernation
    Size,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(Commands::Status) => status(),
        Some(Commands::Size) => size(),
        None => {
            // No subcommand provided, show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            return;
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    Ok(Settings::from_config(&config)?)
}

fn setup() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings()?;
    let host = Host::system(&settings);

    ctrlc::set_handler(move || {
        request_shutdown();
    })?;

    let report = Provisioner::new(&host, &settings).run()?;

    match report.swap_state {
        Some(SwapState::Created) => info!("Swap file created"),
        Some(SwapState::AlreadyPresent) => info!("Swap file was already in place"),
        None => {}
    }
    if !report.warnings.is_empty() {
        info!("Finished with {} warning(s)", report.warnings.len());
    }
    println!("Hibernation is configured. Reboot to apply the new kernel arguments and initramfs.");
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn yes_no(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    }
}

fn status() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings()?;
    let host = Host::system(&settings);
    let state = SystemInspector::new(&host, &settings).inspect()?;
    let gib = target_swap_gib(state.memory.total_bytes, settings.swap_headroom_gib);

    println!("Memory:");
    println!("  Total:         {}", format_size(state.memory.total_bytes));
    println!("  Swap target:   {} GiB", gib);

    println!("\nSwap file ({}):", settings.swap_file.display());
    println!("  Present:       {}", yes_no(Some(state.swap_file_present)));
    match state.fstab_references {
        Some(n) => println!("  fstab entries: {}", n),
        None => println!("  fstab entries: unknown"),
    }
    println!("  Active:        {}", yes_no(state.swap_active));

    println!("\nBoot:");
    println!("  Policy module: {}", yes_no(state.policy_installed));
    if let Some(args) = &state.kernel_args {
        let resume: Vec<&str> = args
            .values("resume")
            .chain(args.values("resume_offset"))
            .map(String::as_str)
            .collect();
        if resume.is_empty() {
            println!("  Resume args:   none");
        } else {
            println!("  Resume args:   {}", resume.join(" "));
        }
    }
    println!("  Initramfs:     {}", yes_no(state.initramfs_enabled));

    let pending = state.pending(&settings);
    if pending.is_empty() {
        println!("\nNothing to do.");
    } else {
        println!("\nPending:");
        for item in pending {
            println!("  - {}", item);
        }
    }
    Ok(())
}

fn size() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings()?;
    let memory = ProcMeminfo.memory_info()?;
    println!(
        "{} GiB ({} RAM + {} GiB headroom)",
        target_swap_gib(memory.total_bytes, settings.swap_headroom_gib),
        format_size(memory.total_bytes),
        settings.swap_headroom_gib
    );
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiosk_hw::{DeviceSettings, MediaDeviceController, V4l2Camera};
use std::path::PathBuf;
use std::sync::Arc;

#[zbus::proxy(
    interface = "org.attendance.Kiosk1",
    default_service = "org.attendance.Kiosk1",
    default_path = "/org/attendance/Kiosk1"
)]
trait Kiosk {
    async fn check_in(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn recent_checkins(&self) -> zbus::Result<String>;
    async fn bind_route(&self, path: &str) -> zbus::Result<String>;
    async fn list_classes(&self) -> zbus::Result<String>;
    async fn list_sessions(&self) -> zbus::Result<String>;
    async fn select_class(&self, class_id: &str) -> zbus::Result<String>;
    async fn select_session(&self, session_id: &str) -> zbus::Result<String>;
    async fn back_to_classes(&self) -> zbus::Result<()>;
    async fn enable_lockdown(&self) -> zbus::Result<()>;
    async fn disable_lockdown(&self, credential: &str) -> zbus::Result<bool>;
    async fn navigate(&self, target: &str) -> zbus::Result<String>;
    async fn key_combo(&self, combo: &str) -> zbus::Result<bool>;
    async fn context_menu(&self) -> zbus::Result<bool>;
    async fn before_unload(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "kiosk", about = "Attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Capture and verify the person in front of the camera
    CheckIn,
    /// Bind the kiosk to a route, e.g. /kiosk/class/5/session/9
    Bind { path: String },
    /// List classes
    Classes,
    /// List selectable sessions for the selected class
    Sessions,
    /// Select a class
    SelectClass { id: String },
    /// Select a session of the selected class
    SelectSession { id: String },
    /// Return to class selection
    Back,
    /// Enter kiosk lockdown
    Lock,
    /// Leave kiosk lockdown
    Unlock {
        /// Exit credential
        #[arg(short, long)]
        credential: String,
    },
    /// Show recent check-ins
    Log,
    /// Ask whether a navigation is allowed (`back` for history)
    Navigate { target: String },
    /// Ask whether a key chord is swallowed, e.g. ctrl+shift+i or f12
    Key { combo: String },
    /// Ask whether the context menu is suppressed
    ContextMenu,
    /// Ask whether closing or reloading is blocked
    BeforeUnload,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured JPEG here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = V4l2Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device, output } => camera_test(&device, output).await?,
        command => {
            let conn = zbus::Connection::session()
                .await
                .context("connecting to session bus")?;
            let proxy = KioskProxy::new(&conn)
                .await
                .context("kioskd is not running")?;
            run(&proxy, command).await?;
        }
    }

    Ok(())
}

async fn run(proxy: &KioskProxy<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Status => print_json(&proxy.status().await?),
        Commands::CheckIn => print_json(&proxy.check_in().await?),
        Commands::Bind { path } => println!("{}", proxy.bind_route(&path).await?),
        Commands::Classes => print_json(&proxy.list_classes().await?),
        Commands::Sessions => print_json(&proxy.list_sessions().await?),
        Commands::SelectClass { id } => print_json(&proxy.select_class(&id).await?),
        Commands::SelectSession { id } => print_json(&proxy.select_session(&id).await?),
        Commands::Back => proxy.back_to_classes().await?,
        Commands::Lock => {
            proxy.enable_lockdown().await?;
            println!("Kiosk locked");
        }
        Commands::Unlock { credential } => {
            if proxy.disable_lockdown(&credential).await? {
                println!("Kiosk unlocked");
            } else {
                anyhow::bail!("invalid exit credential");
            }
        }
        Commands::Log => print_json(&proxy.recent_checkins().await?),
        Commands::Navigate { target } => print_json(&proxy.navigate(&target).await?),
        Commands::Key { combo } => report_block(&combo, proxy.key_combo(&combo).await?),
        Commands::ContextMenu => report_block("context menu", proxy.context_menu().await?),
        Commands::BeforeUnload => report_block("close/reload", proxy.before_unload().await?),
        Commands::Devices | Commands::Test { .. } => anyhow::bail!("command does not use the daemon"),
    }
    Ok(())
}

fn report_block(what: &str, blocked: bool) {
    if blocked {
        println!("{what}: blocked");
    } else {
        println!("{what}: allowed");
    }
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_else(|_| raw.to_string())),
        Err(_) => println!("{raw}"),
    }
}

async fn camera_test(device: &str, output: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics on {device}...");
    tracing::debug!(device, "direct camera test, daemon bypassed");
    let controller = MediaDeviceController::new(Arc::new(V4l2Camera::new(device)), DeviceSettings::default());

    controller.start().await.context("camera did not start")?;
    println!("  playing after {} retries", controller.retry_count());

    let image = controller.capture_frame().await;
    controller.stop().await;
    let image = image.context("capture failed")?;

    let decoded = image::load_from_memory(&image.jpeg).context("decoding capture")?;
    let luma = decoded.to_luma8();
    let mean = luma.pixels().map(|p| p.0[0] as u64).sum::<u64>() / luma.len().max(1) as u64;

    println!("  frame #{}: {}x{}", image.sequence, image.width, image.height);
    println!("  jpeg size: {} bytes", image.len());
    println!("  mean brightness: {mean}/255");

    if let Some(path) = output {
        std::fs::write(&path, &image.jpeg).with_context(|| format!("writing {}", path.display()))?;
        println!("  saved to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockdown_event_commands_parse() {
        let cli = Cli::try_parse_from(["kiosk", "key", "ctrl+shift+i"]).unwrap();
        assert!(matches!(cli.command, Commands::Key { combo } if combo == "ctrl+shift+i"));

        let cli = Cli::try_parse_from(["kiosk", "context-menu"]).unwrap();
        assert!(matches!(cli.command, Commands::ContextMenu));

        let cli = Cli::try_parse_from(["kiosk", "before-unload"]).unwrap();
        assert!(matches!(cli.command, Commands::BeforeUnload));
    }

    #[test]
    fn test_key_requires_combo() {
        assert!(Cli::try_parse_from(["kiosk", "key"]).is_err());
    }
}

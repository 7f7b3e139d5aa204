use anyhow::Result;
use kiosk_api::{RestClient, VerifyClient};
use kiosk_core::lockdown::ExitCredential;
use kiosk_core::{
    DigestCredential, FileFlagStore, FlagStore, Kiosk, LockdownController, PipelineSettings, SystemClock,
};
use kiosk_hw::{DeviceSettings, MediaDeviceController, StreamRequest, V4l2Camera};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod host;

use dbus_interface::{KioskService, BUS_NAME, OBJECT_PATH};
use host::{HostEvent, ShellHost};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(
        api = %config.api_url,
        verify = %config.verify_url,
        camera = %config.camera_device,
        "kioskd starting"
    );

    let flags: Arc<dyn FlagStore> = Arc::new(FileFlagStore::open(config.flags_path()));
    let directory = Arc::new(RestClient::new(&config.api_url, config.request_timeout, flags.clone())?);
    let verifier = Arc::new(VerifyClient::new(&config.verify_url, config.verify_timeout, flags.clone())?);

    let credential: Arc<dyn ExitCredential> = match config
        .exit_credential_sha256
        .as_deref()
        .and_then(DigestCredential::from_hex)
    {
        Some(credential) => Arc::new(credential),
        None => {
            tracing::warn!("no valid exit credential configured; lockdown can only be cleared by restart");
            Arc::new(kiosk_core::lockdown::DenyAll)
        }
    };

    let (host, host_events) = ShellHost::new();
    let lockdown = Arc::new(LockdownController::new(Arc::new(host), flags, credential));
    match lockdown.restore() {
        Ok(true) => tracing::info!("kiosk lockdown restored from previous run"),
        Ok(false) => {}
        Err(e) => tracing::error!(error = %e, "failed to restore kiosk lockdown"),
    }

    let camera = Arc::new(MediaDeviceController::new(
        Arc::new(V4l2Camera::new(&config.camera_device)),
        DeviceSettings {
            request: StreamRequest {
                width: config.width,
                height: config.height,
            },
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            playing_timeout: config.playing_timeout,
            ..DeviceSettings::default()
        },
    ));

    let settings = PipelineSettings {
        verify_timeout: config.verify_timeout,
        late_grace_minutes: config.late_grace_minutes,
        health_interval: config.health_interval,
        ..PipelineSettings::default()
    };
    let kiosk = Arc::new(Kiosk::new(
        directory,
        verifier,
        Arc::new(SystemClock),
        camera,
        lockdown,
        settings,
    ));

    let health = kiosk.pipeline().spawn_health_monitor();
    let revalidation = kiosk.spawn_revalidation(config.revalidate_interval);

    let service = KioskService {
        kiosk: kiosk.clone(),
        camera_device: config.camera_device.clone(),
    };
    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;
    let signals = tokio::spawn(forward_host_events(conn.clone(), host_events));

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "kioskd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("kioskd shutting down");

    health.abort();
    revalidation.abort();
    signals.abort();
    kiosk.pipeline().reset().await;

    Ok(())
}

/// Relay lockdown host events to the shell as D-Bus signals.
async fn forward_host_events(conn: zbus::Connection, mut events: mpsc::UnboundedReceiver<HostEvent>) {
    let iface = match conn
        .object_server()
        .interface::<_, KioskService>(OBJECT_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            tracing::error!(error = %e, "kiosk interface not registered; host events dropped");
            return;
        }
    };
    let emitter = iface.signal_emitter();

    while let Some(event) = events.recv().await {
        let sent = match &event {
            HostEvent::Redirect(path) => KioskService::redirect(emitter, path).await,
            HostEvent::Warning(message) => KioskService::warning(emitter, message).await,
            HostEvent::Fullscreen(on) => KioskService::fullscreen(emitter, *on).await,
        };
        if let Err(e) = sent {
            tracing::warn!(?event, error = %e, "failed to emit host signal");
        }
    }
}

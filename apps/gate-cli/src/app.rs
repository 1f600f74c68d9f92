//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gate_connection::config::default_config_path;
use gate_connection::{
    CommandOutcome, ConnectionEvent, ConnectionManager, CredentialStore, CredentialsRecord,
    FileCredentialStore, GateConfig, MqttConnector,
};
use gate_device::{DeviceConfig, GateDevice, HttpApi, HttpApiConfig, MockActuator};

use crate::cli::{Cli, Command};
use crate::http::send_signed;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Command::Send {
            action,
            side,
            remember,
            wait_secs,
        } => {
            let manager = manager(&config)?;
            if let Some(side) = side {
                manager.set_viewing_side(side);
            }
            if remember {
                manager.set_remember(true);
            }
            let (username, password) = credentials(&manager, cli.username, cli.password)?;
            spawn_status_log(&manager).await;

            manager
                .connect(&username, &password)
                .await
                .context("connecting to broker")?;
            let ticket = manager.send_command(action).await?;
            let outcome = tokio::time::timeout(Duration::from_secs(wait_secs), ticket.outcome())
                .await
                .ok()
                .flatten();
            manager.logout().await;

            match outcome {
                Some(CommandOutcome::Success) => {
                    println!("{action}: ok");
                    Ok(())
                }
                Some(CommandOutcome::Failure(e)) => bail!("{action} failed: {e}"),
                None => bail!("no answer from the gate within {wait_secs}s"),
            }
        }

        Command::Status { wait_secs } => {
            let manager = manager(&config)?;
            let (username, password) = credentials(&manager, cli.username, cli.password)?;
            let mut events = manager
                .take_events()
                .await
                .context("event stream already taken")?;

            manager
                .connect(&username, &password)
                .await
                .context("connecting to broker")?;
            let online = tokio::time::timeout(Duration::from_secs(wait_secs), async {
                while let Some(event) = events.recv().await {
                    if let ConnectionEvent::LivenessChanged { online: true } = event {
                        return true;
                    }
                }
                false
            })
            .await
            .unwrap_or(false);
            manager.logout().await;

            match manager.last_heartbeat() {
                Some(at) if online => println!("gate online (last heartbeat {at})"),
                _ => println!("gate offline"),
            }
            Ok(())
        }

        Command::Http {
            action,
            side,
            url,
            secret,
            api_key,
        } => {
            let wire = action.for_side(side.unwrap_or(config.viewing_side));
            let client = reqwest::Client::new();
            send_signed(&client, &url, wire, &secret, api_key.as_deref()).await?;
            println!("{action}: ok");
            Ok(())
        }

        Command::Device {
            client_id,
            press_ms,
            http_listen,
            api_secret,
            api_key,
        } => {
            let (Some(username), Some(password)) = (cli.username, cli.password) else {
                bail!("device mode needs --username and --password");
            };
            let actuator = Arc::new(MockActuator::new(Duration::from_millis(press_ms)));
            let cancel = CancellationToken::new();

            if let Some(addr) = http_listen {
                let api = HttpApi::new(
                    HttpApiConfig {
                        secret: api_secret.unwrap_or_default(),
                        api_key,
                    },
                    actuator.clone(),
                )?;
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("binding {addr}"))?;
                tokio::spawn({
                    let cancel = cancel.clone();
                    async move {
                        if let Err(e) = api.serve(listener, cancel).await {
                            warn!("HTTP control API stopped: {e}");
                        }
                    }
                });
            }

            let device = GateDevice::new(
                DeviceConfig {
                    client_id,
                    username,
                    password,
                    ..DeviceConfig::default()
                },
                Arc::new(MqttConnector::new(config.broker.clone())),
                actuator,
            );

            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("received Ctrl+C, stopping device");
                    }
                    cancel.cancel();
                }
            });
            device.run(cancel).await?;
            Ok(())
        }

        Command::Forget => {
            let store = credential_store(&config)?;
            CredentialsRecord::forget(&store)?;
            println!("stored credentials removed");
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> GateConfig {
    let Some(path) = path.cloned().or_else(default_config_path) else {
        return GateConfig::default();
    };
    match GateConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), "failed to load config, using defaults: {e}");
            GateConfig::default()
        }
    }
}

fn credential_store(config: &GateConfig) -> anyhow::Result<FileCredentialStore> {
    let path = config
        .credentials_path()
        .context("cannot determine credential file location")?;
    Ok(FileCredentialStore::new(path)?)
}

fn manager(config: &GateConfig) -> anyhow::Result<ConnectionManager> {
    let store: Arc<dyn CredentialStore> = Arc::new(credential_store(config)?);
    let manager = ConnectionManager::new(
        config.manager_config(),
        Arc::new(MqttConnector::new(config.broker.clone())),
        store,
    );
    manager.set_viewing_side(config.viewing_side);
    Ok(manager)
}

/// Flags and environment win; the stored record fills the gaps.
fn credentials(
    manager: &ConnectionManager,
    username: Option<String>,
    password: Option<String>,
) -> anyhow::Result<(String, String)> {
    if let (Some(u), Some(p)) = (&username, &password) {
        return Ok((u.clone(), p.clone()));
    }
    let stored = manager.stored_credentials().unwrap_or_else(|e| {
        warn!("cannot read stored credentials: {e}");
        CredentialsRecord::default()
    });
    let username = username.unwrap_or(stored.username);
    let password = password.unwrap_or(stored.password);
    if username.is_empty() || password.is_empty() {
        bail!("no credentials: pass --username/--password or log in once with --remember");
    }
    Ok((username, password))
}

async fn spawn_status_log(manager: &ConnectionManager) {
    let Some(mut events) = manager.take_events().await else {
        return;
    };
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Status(text) => info!("{text}"),
                ConnectionEvent::Failure(e) => warn!("{e}"),
                _ => {}
            }
        }
    });
}

//! Run command for `nova-controller run`.
//!
//! Starts the controller for a cascade file, logs client state changes, and
//! optionally serves a settings page over stdio until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;

use super::{ReadOnlyEditor, RunArgs};
use crate::client::{ClientStates, DefaultConnector};
use crate::config::Config;
use crate::controller::Controller;
use crate::handshake::{connect_to_page, StreamChannel};

pub async fn run_controller(config: &Config, args: &RunArgs) -> Result<()> {
    let environment = &args.environment;
    let raw = environment.load_cascade()?;

    let controller = Arc::new(Controller::new(
        config,
        environment.registry(config)?,
        Arc::new(ReadOnlyEditor),
        Arc::new(DefaultConnector::new(config.worker.clone())),
    ));
    controller.update_cascade(raw);
    controller.set_document(environment.document());

    let mut states = controller.manager().subscribe();
    let reporter = tokio::spawn(async move {
        let mut previous = ClientStates::new();
        while states.changed().await.is_ok() {
            let current = states.borrow_and_update().clone();
            report_changes(&previous, &current);
            previous = current;
        }
    });

    let page = if args.page_stdio {
        let (sink, source) = StreamChannel::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
        let controller = controller.clone();
        Some(tokio::spawn(async move {
            match connect_to_page(sink, source).await {
                Ok(page) => {
                    tracing::info!("Settings page connected");
                    let _ = controller.attach_page(page).await;
                }
                Err(e) => tracing::warn!("Settings page handshake failed: {}", e),
            }
        }))
    } else {
        None
    };

    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
        .context("Controller failed")?;

    if let Some(page) = page {
        page.abort();
    }
    reporter.abort();
    Ok(())
}

fn report_changes(previous: &ClientStates, current: &ClientStates) {
    for (key, state) in current {
        if previous.get(key) != Some(state) {
            tracing::info!(client = %key, state = %state, "Client state");
        }
    }
    for key in previous.keys().filter(|key| !current.contains_key(*key)) {
        tracing::info!(client = %key, "Client removed");
    }
}

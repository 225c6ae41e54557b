//! Trellis daemon.
//!
//! Hosts the address table and the set service on one event loop and drives
//! their timers. No transport or client is attached here: embedders do that
//! through the library APIs, so this binary only runs the timers and logs
//! what the services emit.

mod cli;
mod config;
mod identity;
mod logging;
mod recommender;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use trellis_net_addresses::AddressTable;
use trellis_set::SetService;
use trellis_tasks::sleep_until;

use crate::cli::Cli;
use crate::config::TrellisConfig;
use crate::recommender::LoggingRecommender;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.logs)?;

    let config = TrellisConfig::load(cli.config.as_deref())?;
    let local_peer = identity::local_peer_id(cli.identity_seed.as_deref())?;
    info!(%local_peer, "starting trellis");

    let mut addresses =
        AddressTable::new(local_peer, &config.addresses, LoggingRecommender::default());
    let mut sets = SetService::new(local_peer, config.set);
    let mut address_events = addresses.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = sleep_until(addresses.next_unblock_deadline()) => {
                let unblocked = addresses.unblock_expired();
                debug!(unblocked, "unblock timers fired");
            }
            _ = sleep_until(sets.next_timeout()) => {
                let expired = sets.expire_timeouts();
                debug!(expired, "incoming operations timed out");
            }
            event = address_events.recv() => match event {
                Ok(event) => debug!(peer = %event.address().peer(), ?event, "address event"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "address event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
        // Without a transport the channel teardowns of expired requests
        // have nowhere to go.
        while let Some(event) = sets.poll_event() {
            debug!(?event, "set service event");
        }
    }

    sets.shutdown();
    addresses.shutdown();
    info!(
        live_registrations = addresses.recommender().live(),
        "trellis stopped"
    );
    Ok(())
}

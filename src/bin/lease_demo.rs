//! End-to-end walk through a listing and a lease against the simulated chain

use std::sync::Arc;

use rental_ledger::simulated::{SimulatedChain, DEFAULT_CHAIN_ID};
use rental_ledger::{
    Action, Address, Amount, AppState, ChainId, LedgerClient, ListingFields, ListingId,
    OrchestratorConfig, PropertyDetails, ProviderSession, TransactionOrchestrator,
    DEFAULT_LEASE_MONTHS,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("{}; using the local development deployment", e);
            OrchestratorConfig::new(Address::parse(DEMO_CONTRACT)?, ChainId(DEFAULT_CHAIN_ID))
        }
    };

    let chain = SimulatedChain::builder().chain_id(config.network.0).build();
    let session = ProviderSession::with_backend(chain.clone());
    let orchestrator = Arc::new(TransactionOrchestrator::new(
        config,
        session,
        LedgerClient::new(chain.clone()),
    ));
    let _cleanup = orchestrator.clone().start_background_tasks();

    let mut state = AppState::new();
    state.apply(Action::Connected(orchestrator.connect().await?));

    let fields = ListingFields {
        property_address: "123 Example St, Springfield".to_string(),
        monthly_rent: Amount::parse("1200")?,
        details: PropertyDetails {
            bedrooms: 2,
            bathrooms: 1.5,
            sqft: 950,
            description: "Sunny corner unit".to_string(),
            amenities: "Parking, Laundry".to_string(),
        },
    };

    state.apply(Action::SubmissionStarted);
    let outcome = orchestrator.submit_listing(fields.clone()).await;
    info!("{}", outcome.summary());
    let listing_id = outcome.emitted_id().map(ListingId);
    state.apply(Action::ListingSubmitted {
        fields: fields.clone(),
        outcome,
    });

    let Some(listing_id) = listing_id else {
        warn!("Listing was not created; stopping");
        return Ok(());
    };

    state.apply(Action::SubmissionStarted);
    let outcome = orchestrator
        .submit_lease(listing_id, DEFAULT_LEASE_MONTHS, fields.monthly_rent)
        .await;
    info!("{} (next: {:?})", outcome.summary(), outcome.follow_up());
    state.apply(Action::LeaseSubmitted {
        listing_id,
        outcome,
    });

    // a second lease on the same listing reverts
    let again = orchestrator
        .submit_lease(listing_id, DEFAULT_LEASE_MONTHS, fields.monthly_rent)
        .await;
    info!("{} (next: {:?})", again.summary(), again.follow_up());

    state.apply(Action::ListingsLoaded(orchestrator.fetch_all_listings().await?));
    for listing in &state.listings {
        info!(
            "Listing {} at {}: {} per month, available: {}",
            listing.id, listing.property_address, listing.monthly_rent, listing.is_available
        );
    }

    let stats = orchestrator.get_statistics();
    info!(
        "{} runs, {} confirmed, {} failed, success rate {:.2}",
        stats.total_count,
        stats.confirmed_count,
        stats.failed_count,
        stats.success_rate()
    );

    Ok(())
}

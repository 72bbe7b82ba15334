//! Application state reducer
//!
//! Folds session changes and orchestration outcomes into the in-memory
//! listing view. Only confirmed outcomes touch the listings; everything
//! else just updates the status message.

use tracing::{debug, warn};

use crate::outcome::TransactionOutcome;
use crate::provider::Session;
use crate::types::{Listing, ListingFields, ListingId};

/// Something that happened to the application
#[derive(Debug, Clone)]
pub enum Action {
    Connected(Session),
    Disconnected,
    /// An orchestration is about to start
    SubmissionStarted,
    ListingSubmitted {
        fields: ListingFields,
        outcome: TransactionOutcome,
    },
    LeaseSubmitted {
        listing_id: ListingId,
        outcome: TransactionOutcome,
    },
    /// Fresh read from the ledger; replaces the local list
    ListingsLoaded(Vec<Listing>),
}

/// In-memory application view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub session: Option<Session>,
    pub listings: Vec<Listing>,
    /// Set while an orchestration is in flight
    pub processing: bool,
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(&self, id: ListingId) -> Option<&Listing> {
        self.listings.iter().find(|l| l.id == id)
    }

    pub fn available_listings(&self) -> impl Iterator<Item = &Listing> {
        self.listings.iter().filter(|l| l.is_available)
    }

    /// Apply one action
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Connected(session) => {
                self.status_message = Some(format!("Connected as {}", session.account));
                self.session = Some(session);
            }
            Action::Disconnected => {
                self.session = None;
                self.status_message = Some("Wallet disconnected".to_string());
            }
            Action::SubmissionStarted => {
                self.processing = true;
                self.status_message = None;
            }
            Action::ListingSubmitted { fields, outcome } => {
                self.processing = false;
                self.status_message = Some(outcome.summary());
                if let Some(id) = outcome.emitted_id() {
                    self.append_listing(ListingId(id), fields);
                }
            }
            Action::LeaseSubmitted {
                listing_id,
                outcome,
            } => {
                self.processing = false;
                self.status_message = Some(outcome.summary());
                if outcome.is_confirmed() {
                    match self.listings.iter_mut().find(|l| l.id == listing_id) {
                        Some(listing) => listing.is_available = false,
                        None => debug!("Leased listing {} is not in the local view", listing_id),
                    }
                }
            }
            Action::ListingsLoaded(listings) => {
                self.listings = listings;
            }
        }
    }

    fn append_listing(&mut self, id: ListingId, fields: ListingFields) {
        let Some(session) = &self.session else {
            warn!("Listing {} confirmed without a local session; reload to show it", id);
            return;
        };

        self.listings.push(Listing {
            id,
            owner: session.account.clone(),
            property_address: fields.property_address,
            monthly_rent: fields.monthly_rent,
            is_available: true,
            details: serde_json::to_string(&fields.details).unwrap_or_default(),
        });
    }
}

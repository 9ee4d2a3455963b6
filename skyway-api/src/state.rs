use std::sync::Arc;

use skyway_core::cache::ResponseCache;
use skyway_core::notify::TaskQueue;
use skyway_core::repository::{
    AirlineRepository, DestinationRepository, FlightRepository, FlightRequestRepository,
    PassengerRepository, ReservationRepository, UserRepository,
};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub airlines: Arc<dyn AirlineRepository>,
    pub destinations: Arc<dyn DestinationRepository>,
    pub flights: Arc<dyn FlightRepository>,
    pub flight_requests: Arc<dyn FlightRequestRepository>,
    pub reservations: Arc<dyn ReservationRepository>,
    pub passengers: Arc<dyn PassengerRepository>,
    pub users: Arc<dyn UserRepository>,
    pub cache: ResponseCache,
    pub queue: Arc<dyn TaskQueue>,
    pub auth: AuthConfig,
    pub page_size: u64,
}

impl AppState {
    /// State over a single backend that implements every repository.
    pub fn with_store<S>(
        store: Arc<S>,
        cache: ResponseCache,
        queue: Arc<dyn TaskQueue>,
        auth: AuthConfig,
        page_size: u64,
    ) -> Self
    where
        S: AirlineRepository
            + DestinationRepository
            + FlightRepository
            + FlightRequestRepository
            + ReservationRepository
            + PassengerRepository
            + UserRepository
            + 'static,
    {
        Self {
            airlines: store.clone(),
            destinations: store.clone(),
            flights: store.clone(),
            flight_requests: store.clone(),
            reservations: store.clone(),
            passengers: store.clone(),
            users: store,
            cache,
            queue,
            auth,
            page_size,
        }
    }
}

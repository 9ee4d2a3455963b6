pub mod airline;
pub mod destination;
pub mod flight;
pub mod flight_request;
pub mod passenger;
pub mod reservation;
pub mod user;

pub use airline::{Airline, AirlineInput, AirlinePatch, AirlineSummary};
pub use destination::{Coordinates, Destination, DestinationDetail, DestinationInput, DestinationPatch, DestinationSummary};
pub use flight::{Flight, FlightDetail, FlightInput, FlightPatch, FlightStatus, FlightSummary};
pub use flight_request::{
    FlightRequest, FlightRequestDetail, FlightRequestInput, FlightRequestPatch, FlightRequestSummary,
    RequestContext, RequestStatus,
};
pub use passenger::{
    Gender, PassengerCategory, PassengerDetail, PassengerInput, PassengerPatch, PassengerStatistics,
    PassengerSummary, PassengerType, ReservationPassenger,
};
pub use reservation::{
    Reservation, ReservationDetail, ReservationInput, ReservationPatch, ReservationStatistics,
    ReservationStatus, ReservationSummary, TransitionError, FlightInfo, UserInfo,
};
pub use user::{User, UserDetail, UserInput, UserPatch, UserPublic};

use serde::Serialize;

/// Compact reference to a related row embedded in serialized views.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RowRef {
    pub id: i64,
    pub code: String,
    pub name: String,
}

pub mod app_config;
pub mod database;
pub mod events;
pub mod memory_repo;
pub mod redis_repo;

pub mod airline_repo;
pub mod destination_repo;
pub mod flight_repo;
pub mod flight_request_repo;
pub mod passenger_repo;
pub mod reservation_repo;
pub mod user_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use events::EventProducer;
pub use memory_repo::MemoryStore;
pub use redis_repo::RedisCache;

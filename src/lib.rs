pub mod api;
pub mod clock;
pub mod config;
pub mod database;
pub mod errors;
pub mod logging;
pub mod models;
pub mod review_service;
pub mod scheduler;
pub mod session;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use database::Database;
pub use errors::*;
pub use models::*;
pub use review_service::ReviewService;
pub use scheduler::{Difficulty, Sm2Scheduler};
pub use session::{SessionSummary, StudySession};
pub use store::ReviewStore;

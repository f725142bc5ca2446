pub mod checkin;
pub mod config;
pub mod note;
pub mod stats;

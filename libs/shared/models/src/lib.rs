pub mod appointment;
pub mod auth;
pub mod error;
pub mod payment;
pub mod scheduling;
pub mod time;

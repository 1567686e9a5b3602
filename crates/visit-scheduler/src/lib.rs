//! Property-visit scheduling: operating windows, slot arbitration and the appointment
//! approval lifecycle, plus the HTTP surface the API service mounts.

pub mod config;
pub mod error;
pub mod scheduling;
pub mod telemetry;

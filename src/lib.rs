//! Homecare: record-keeping backend for home health agencies.
//!
//! Service modules (`identity`, `patients`, `visits`, `oasis`,
//! `communication`, `intake`) hold the domain rules and take a SQLite
//! connection per call. `api` exposes them over HTTP.

pub mod access;
pub mod api;
pub mod communication;
pub mod config;
pub mod core_state;
pub mod crypto;
pub mod db;
pub mod error;
pub mod identity;
pub mod intake;
pub mod models;
pub mod oasis;
pub mod patients;
pub mod pipeline;
pub mod storage;
pub mod visits;

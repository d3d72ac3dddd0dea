//! Payment reconciliation backend.
//!
//! Keeps locally recorded orders consistent with the payment gateway's view
//! of the money: gateway order initiation, signature-verified payment
//! confirmation, and webhook-driven state correction.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod health;
pub mod services;

//! Gatekeeper - Attempt Rate Limiting Service
//!
//! This crate implements the attempt limiter that guards authentication
//! endpoints (login, password reset, verification resend). Attempts are
//! counted per identifier and action over a sliding window; reaching the
//! threshold locks the key for a fixed cooldown. The limiter is a local,
//! per-instance guard and can be embedded directly or served over gRPC so a
//! single process owns the state for every key.

pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;

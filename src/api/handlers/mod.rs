//! API handlers for complyauth.
//!
//! `auth` holds the credential and session lifecycle; `health` is the probe
//! used by load balancers and the dashboard status badge.

pub mod auth;
pub mod health;

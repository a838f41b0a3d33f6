//! Low-voltage construction takeoff from floor-plan drawings.
//!
//! Each sheet goes through three vision-model passes (legend extraction,
//! 3x3 grid count, independent validation) which are reconciled into one
//! per-sheet result; batches fold those into per-system totals.

pub mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod services;

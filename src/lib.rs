//! # Recipe Costing
//!
//! Costs recipes from purchase prices, keeps a per-brand stock of
//! ingredients in PostgreSQL, and turns production orders into checked,
//! all-or-nothing stock deductions with an append-only history.

pub mod access;
pub mod config;
pub mod costing;
pub mod db;
pub mod error;
pub mod localization;
pub mod model;
pub mod planning;
pub mod production;
pub mod retry;
pub mod ui_builder;

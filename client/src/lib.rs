//! Towerdeck kiosk core.
//!
//! SYSTEM CONTEXT
//! ==============
//! Everything the sales kiosk does apart from drawing pixels: the broker
//! connection (`net`), the cast-to-TV lock (`cast`), navigation state
//! (`store`), CSV-derived indices (`layout`, `availability`), identity
//! (`session`), the availability editing API (`api`) and the runtime that
//! wires them together (`kiosk`).

pub mod amenities;
pub mod api;
pub mod availability;
pub mod cast;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod csv;
pub mod kiosk;
pub mod layout;
pub mod net;
pub mod session;
pub mod store;

pub mod availability;
pub mod broker;

pub mod amplification;
pub mod cascade;
pub mod config;
pub mod curve;
pub mod error;
pub mod hazard_maps;
pub mod pmap;
pub mod reinsurance;
pub mod treaty;
pub mod types;

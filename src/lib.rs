pub mod allocation;
pub mod analysis;
pub mod baseline;
pub mod config;
pub mod demand;
pub mod error;
pub mod hydrology;
pub mod kpi;
pub mod montecarlo;
pub mod senior_rights;
pub mod sensitivity;
pub mod simulation;
pub mod types;

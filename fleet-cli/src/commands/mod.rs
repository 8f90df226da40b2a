pub mod agent;
pub mod audit;
pub mod hub;
pub mod vps;

pub mod cli;
pub mod simulation;
pub mod telemetry;

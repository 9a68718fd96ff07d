pub mod cli;
mod decompose;
mod logging;
mod simulate;

pub use simulate::{SimulationParameters, SimulationResult, simulation_pipeline};

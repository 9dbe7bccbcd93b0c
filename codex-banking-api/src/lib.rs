#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Composes every bounded-context crate into a single `BankingFacade`,
//! following the teacher's one-facade-per-API-crate shape.

mod facade;
mod telemetry;

pub use facade::BankingFacade;
pub use facade::FacadeError;
pub use telemetry::BankingTelemetry;
pub use telemetry::TelemetryCounters;

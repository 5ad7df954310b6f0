//! Host side tooling for the software PLL: loop profiles, header files,
//! closed loop simulation, plots and cross validation against a reference
//! implementation.

pub mod driver;
pub mod error;
pub mod header;
pub mod plot;
pub mod profile;
pub mod reference;

pub use driver::{Driver, ReferenceStep, Scenario, TickRecord, Trajectory};
pub use error::SimError;
pub use profile::Profile;

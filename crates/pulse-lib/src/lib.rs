pub mod config;
pub mod detectors;
pub mod io;
pub mod metrics;
pub mod plot;
pub mod session;
pub mod signal;
pub mod source;

pub use config::*;
pub use detectors::*;
pub use metrics::*;
pub use session::*;
pub use signal::*;

// Application layer - use cases over the repository.
// The CLI and the exporters only talk to `LedgerService`.

pub mod error;
mod service;

pub use error::*;
pub use service::*;

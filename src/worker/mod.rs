//! Service-worker style controller for offline availability.
//!
//! A controller version installs its shell manifest into a fresh cache
//! generation, activates by deleting every older generation, and then serves
//! same-origin requests network-first with the cache as fallback.

mod controller;
mod event;
mod registration;

pub use controller::{purge_stale_generations, ControllerConfig, OfflineController, WorkerState};
pub use event::{EventKind, ExtendableEvent};
pub use registration::Registration;

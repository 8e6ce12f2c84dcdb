//! Transport layer module.

pub mod mock;
#[cfg(feature = "midir")]
pub mod native;
pub mod traits;

pub use mock::{MockBackend, MockLink};
#[cfg(feature = "midir")]
pub use native::{MidirBackend, MidirLink};
pub use traits::{LinkEvent, MidiBackend, MidiLink, TransportError};

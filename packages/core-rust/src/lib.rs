//! anystore core: dynamic values, serialization modes, key handling,
//! hashing, clocks and the shared error type.

pub mod clock;
pub mod error;
pub mod hash;
pub mod key;
pub mod serialize;
pub mod stats;
pub mod value;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use error::{ErrorKind, Result, StoreError};
pub use hash::HashAlgorithm;
pub use key::KeyFilter;
pub use serialize::{Codec, Mode};
pub use stats::Stats;
pub use value::Value;

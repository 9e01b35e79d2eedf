pub mod addr;
pub mod aggbag;
pub mod bag;
pub mod codec;
pub mod config;
pub mod error;
pub mod field;
pub mod ipset;
pub mod text;

pub use aggbag::AggBag;
pub use bag::Bag;
pub use codec::Persist;
pub use error::{EngineError, EngineResult};
pub use ipset::IpSet;

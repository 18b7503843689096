pub mod hub;
pub mod model;
pub mod registry;

pub use hub::ConnectionHub;
pub use model::{ClientId, ConnectionId, MinerSession, RigSession};
pub use registry::{Activation, RegistryError, Removal, SessionRegistry};

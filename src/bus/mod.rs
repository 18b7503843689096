//! Fleet-wide command/event bus and the clock that drives it.

pub mod message_bus;
pub mod messages;
pub mod ticker;

pub use message_bus::{HandlerFault, MessageBus, PublishReport, RegistrationInfo};
pub use messages::{
    ClientActivated, ClientConnected, ClientDisconnected, FleetShuttingDown, HandlerId,
    LongTick, Message, ProfilePropertyChanged, SetProfilePropertyCommand, ShortTick,
};
pub use ticker::Ticker;

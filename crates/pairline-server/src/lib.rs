pub mod background;
pub mod bus;
pub mod controller;
pub mod handlers;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod sink;
pub mod stream;

pub use bus::{EventBus, Subscription};
pub use controller::SessionController;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use sink::{ChannelSink, EventSink};

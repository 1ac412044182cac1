//! Session bridge: SSH channel <-> pod exec stream
//!
//! Two copy loops share one cancellation token. Pod output flows under the
//! client's send window ([`SendWindow`]); client input flows through a
//! bounded queue ([`InputQueue`]) that the SSH handler never waits on.

mod input;
mod proxy;
mod sink;
mod window;

pub use input::{InputOverflow, InputQueue};
pub use proxy::{Activity, Bridge, BridgeConfig, BridgeEnd, BridgeOutcome, ClientInput};
pub use sink::{ChannelSink, ClientChannel};
pub use window::SendWindow;

/// Depth of the client to pod input queue, in SSH data messages
pub const INPUT_QUEUE_DEPTH: usize = 256;

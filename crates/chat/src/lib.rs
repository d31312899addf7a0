//! Parley Chat - platform-facing plumbing
//!
//! Connects the decision engine to a chat platform without depending on any
//! particular one:
//! - **Gateway** (`gateway`) - transport contract, reconnect policy, update pump
//! - **Workers** (`workers`) - one ordered queue per chat, chats run concurrently
//! - **Handler** (`handler`) - pipeline outcome to outgoing messages
//! - **Commands** (`commands`) - admin commands for moderation, triggers, modules
//!
//! ```text
//! transport -> GatewayRunner -> ChatWorkers -> MessageHandler -> DecisionPipeline
//!                                                  |
//!                                     CommandRouter / transport.send
//! ```

pub mod commands;
pub mod events;
pub mod gateway;
pub mod handler;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::{CommandRouter, CommandService, EngineCommandService, NoopCommandService};
pub use events::{InboundEnvelope, InboundEvent, IncomingMessage};
pub use gateway::{ChatTransport, GatewayRunner, NoopTransport, OutgoingMessage, ReconnectPolicy};
pub use handler::MessageHandler;
pub use workers::ChatWorkers;

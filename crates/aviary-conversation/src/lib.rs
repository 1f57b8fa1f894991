pub mod addressee;
pub mod coalesce;
pub mod gateway;
pub mod history;
pub mod message_build;
pub mod prompt;
pub mod turn;
pub mod worker;

pub use gateway::{ChannelGateway, GatewayAdapter, PriorMessage};
pub use message_build::MediaDownloader;
pub use turn::TurnContext;
pub use worker::{spawn, ChannelAgentHandle, WorkerConfig};

#![forbid(unsafe_code)]

pub mod attempts;
pub mod config;
pub mod error;
pub mod gateway;
mod sync;

pub use exam_core::Clock;
pub use exam_core::model::ErrorKind;

pub use attempts::{AttemptController, ControllerOptions, RetryPolicy, SubmitOutcome};
pub use config::{EngineConfig, EngineConfigDraft, GatewayConfig, SessionTimings};
pub use error::{ConfigError, GatewayError, Notice, NoticeAction, NoticeLevel, SessionError};
pub use gateway::{HttpGateway, InMemoryGateway, RemoteGateway, TestFixture};

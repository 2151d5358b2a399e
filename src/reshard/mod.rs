//! Resharding coordination core
//!
//! Request validation, the durable operation record, the phase handler
//! table and its driver, the instance registry and the completion bridge.

pub mod builder;
pub mod catalog;
pub mod command;
pub mod completion;
pub mod machine;
pub mod participant;
pub mod phase;
pub mod placement;
pub mod record;
pub mod registry;
pub mod request;
pub mod store;
pub mod types;

pub use catalog::{CatalogClient, CollectionEntry, InMemoryCatalog, RoutingInfo, ShardInfo};
pub use command::ReshardService;
pub use completion::Completion;
pub use machine::{MachineSettings, StateMachine};
pub use participant::{Command, Instruction, ParticipantClient, ParticipantReport};
pub use record::{
    OperationRecord, Participant, ParticipantRole, ParticipantStatus, Phase, ReshardingResult,
};
pub use registry::{InstanceHandle, Registry};
pub use request::{ReshardCollectionRequest, ValidationContext, WriteConcern};
pub use store::{InMemoryOperationStore, OperationStore};
pub use types::{CollectionIdentity, KeyPattern, Namespace, ShardId, ZoneRange};

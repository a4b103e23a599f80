//! SOME/IP Service Discovery (SD): wire codec, reboot/session tracking, the
//! outbound send scheduler, and the client/server/eventgroup state machines
//! that drive dynamic service discovery and event subscription.
//!
//! # Overview
//!
//! SOME/IP-SD uses special SOME/IP messages (Service ID 0xFFFF, Method ID
//! 0x8100) to discover services and manage event subscriptions. It runs
//! over UDP, normally against the multicast group 224.224.224.245:30490.
//!
//! The wire types ([`SdMessage`], [`SdEntry`], [`SdOption`]) are exchanged
//! unchanged regardless of role; [`client_sm`] and [`server_sm`] build the
//! required/provided-instance state machines on top of them, and
//! [`eventgroup`] owns the subscription lifecycle for a provided instance.

pub mod client_sm;
pub mod collaborators;
pub mod config;
pub mod endpoint;
mod entry;
pub mod eventgroup;
mod message;
mod option;
pub mod observer;
pub mod reboot;
pub mod scheduler;
pub mod server_sm;
mod types;

pub use client_sm::{ClientSm, ClientState};
pub use collaborators::{
    AllowAll, IamPolicy, NullStatistics, OfferObserver, RemoteClient, StatEvent, StatisticsSink,
};
pub use endpoint::{Inbound, SdEndpoint};
pub use entry::{EventgroupEntry, SdEntry, ServiceEntry};
pub use eventgroup::{
    AdmitResult, DispatchPlan, EventgroupSubscriptionManager, RejectReason, Subscription,
    SubscriptionKind,
};
pub use message::{SdFlags, SdMessage};
pub use observer::{ObserverKey, OfferObserverRegistry};
pub use option::{ConfigurationOption, Endpoint, IPv4EndpointOption, IPv6EndpointOption, SdOption};
pub use reboot::{OutboundSession, RebootTracker, SessionObservation};
pub use scheduler::{DueBatch, EntryId, SendScheduler};
pub use server_sm::{ServerSm, ServerState};
pub use types::{
    CastKind, EntryType, EventgroupId, InstanceId, OptionType, ServiceInstanceId,
    TransportProtocol, SD_DEFAULT_PORT, SD_ENTRY_SIZE, SD_METHOD_ID, SD_MULTICAST_ADDR,
    SD_SERVICE_ID,
};

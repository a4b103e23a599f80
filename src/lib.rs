//! SOME/IP Service Discovery daemon core.
//!
//! This crate implements the SOME/IP-SD subsystem of an automotive SOME/IP
//! daemon: the wire codec, the client- and server-side discovery state
//! machines, the eventgroup subscription lifecycle, and the outbound
//! message scheduler that coalesces SD entries into datagrams. It is the
//! part of a SOME/IP daemon responsible for *finding* and *tracking*
//! service instances and event subscriptions on the wire; marshalling
//! method/event payloads, the JSON configuration loader, and the
//! application IPC boundary are concerns of the daemon binary that embeds
//! this crate.
//!
//! # Example
//!
//! ```no_run
//! use someip_sd_daemon::sd::{ClientSm, config::ClientTiming};
//! use someip_sd_daemon::{ServiceId};
//! use someip_sd_daemon::sd::InstanceId;
//!
//! let mut client = ClientSm::new(
//!     ServiceId(0x1234),
//!     InstanceId(0x0001),
//!     1,
//!     0,
//!     ClientTiming::default(),
//! );
//! client.request();
//! ```
//!
//! # Protocol overview
//!
//! SOME/IP-SD messages are ordinary SOME/IP notifications (service id
//! 0xFFFF, method id 0x8100) whose payload is a flags byte, an array of
//! fixed-size entries, and an array of variable-size options:
//!
//! ```text
//! +--------+--------+--------+--------+
//! | Flags  |        Reserved         |  (4 bytes)
//! +--------+--------+--------+--------+
//! |       Entries Array Length        |  (4 bytes)
//! +--------+--------+--------+--------+
//! |           Entries ...             |  (16 bytes each)
//! +--------+--------+--------+--------+
//! |       Options Array Length        |  (4 bytes)
//! +--------+--------+--------+--------+
//! |           Options ...             |  (variable)
//! +--------+--------+--------+--------+
//! ```

pub mod error;
pub mod header;
pub mod message;
pub mod sd;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{Result, SomeIpError};
pub use header::{ClientId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
pub use message::{MessageBuilder, SomeIpMessage};
pub use types::{MessageType, ReturnCode, PROTOCOL_VERSION};

//! SOME/IP-SD server demo.
//!
//! Offers a single service instance with one eventgroup and answers
//! FindService/Subscribe traffic from the multicast group. Run this first,
//! then run the sd_client demo.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use someip_sd_daemon::header::ServiceId;
use someip_sd_daemon::sd::config::{
    EventgroupConfig, EventTransport, ProvidedInstanceConfig, ServerTiming,
};
use someip_sd_daemon::sd::{
    Endpoint, EventgroupId, EventgroupSubscriptionManager, InstanceId, SdEndpoint, SdEntry,
    ServerSm,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let endpoint = Endpoint::udp("127.0.0.1:30501".parse()?);
    let config = ProvidedInstanceConfig {
        service_id: ServiceId(0x1234),
        instance_id: InstanceId(0x0001),
        major_version: 1,
        minor_version: 0,
        udp_endpoint: Some(endpoint.address),
        tcp_endpoint: None,
        eventgroups: vec![EventgroupConfig {
            eventgroup_id: EventgroupId(0x0001),
            event_transports: vec![EventTransport::Udp],
            multicast_threshold: Some(2),
            multicast_endpoint: Some("224.224.224.245:30511".parse()?),
        }],
        timing: ServerTiming::default(),
    };

    let mut sd = SdEndpoint::open(Ipv4Addr::new(127, 0, 0, 1), None).await?;
    let mut server = ServerSm::new(
        config.service_id,
        config.instance_id,
        config.major_version,
        config.minor_version,
        vec![endpoint],
        config.timing.clone(),
    );
    let mut subscriptions = EventgroupSubscriptionManager::new();

    tracing::info!(addr = %sd.local_addr()?, "sd server listening");

    server.service_up();
    let offer = server.start_repetition();
    sd.send_multicast(&to_message(&offer)).await?;

    loop {
        let inbound = sd.recv().await?;
        for entry in &inbound.message.entries {
            match entry {
                SdEntry::Service(s) if s.ttl == 0xFFFFFF => {
                    if server.matches_find(s.service_id, s.instance_id, s.major_version, s.minor_version) {
                        if let Some(reply) = server.on_find_service(inbound.from, Instant::now()) {
                            sd.send_unicast(inbound.from, &to_message(&reply)).await?;
                            tracing::info!(from = %inbound.from, "answered find service");
                        }
                    }
                }
                SdEntry::Eventgroup(eg) if eg.ttl > 0 => {
                    let result = subscriptions.admit(
                        true,
                        &config,
                        inbound.from,
                        eg,
                        Some(inbound.from),
                        None,
                        |_| false,
                        Instant::now(),
                    );
                    tracing::info!(eventgroup = ?eg.eventgroup_id, from = %inbound.from, ?result, "subscribe request");
                }
                _ => {}
            }
        }
    }
}

fn to_message(entry: &SdEntry) -> someip_sd_daemon::sd::SdMessage {
    someip_sd_daemon::sd::SdMessage {
        flags: Default::default(),
        entries: vec![entry.clone()],
        options: Vec::new(),
    }
}

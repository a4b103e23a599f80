//! SOME/IP-SD client demo.
//!
//! Requests a service instance, subscribes to its eventgroup once offered,
//! and prints offer/subscribe traffic as it arrives. Run the sd_server demo
//! first.

use std::net::Ipv4Addr;
use std::time::Instant;

use someip_sd_daemon::header::ServiceId;
use someip_sd_daemon::sd::config::ClientTiming;
use someip_sd_daemon::sd::{ClientSm, EventgroupId, InstanceId, SdEndpoint, SdEntry, SdMessage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut sd = SdEndpoint::open(Ipv4Addr::new(127, 0, 0, 1), None).await?;
    let mut client = ClientSm::new(
        ServiceId(0x1234),
        InstanceId(0x0001),
        1,
        0,
        ClientTiming::default(),
    );

    tracing::info!(addr = %sd.local_addr()?, "sd client listening");

    client.request();
    let find = client.start_repetition().expect("fresh client always finds one");
    sd.send_multicast(&SdMessage {
        flags: Default::default(),
        entries: vec![find],
        options: Vec::new(),
    })
    .await?;

    loop {
        let inbound = sd.recv().await?;
        for entry in &inbound.message.entries {
            if let SdEntry::Service(s) = entry {
                if client.matches(s.service_id, s.instance_id, s.major_version, s.minor_version) {
                    if s.ttl == 0 {
                        tracing::info!("service stopped offering");
                        client.on_stop_offer();
                        continue;
                    }
                    let endpoints = inbound.message.get_endpoints_for_entry(entry);
                    tracing::info!(?endpoints, ttl = s.ttl, "service offered");
                    client.on_offer(endpoints, s.ttl, Instant::now());

                    let subscribe = client.subscribe_entry(EventgroupId(0x0001), s.ttl);
                    sd.send_unicast(
                        inbound.from,
                        &SdMessage {
                            flags: Default::default(),
                            entries: vec![SdEntry::Eventgroup(subscribe)],
                            options: Vec::new(),
                        },
                    )
                    .await?;
                }
            }
        }
    }
}

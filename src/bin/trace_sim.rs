//! Traceroute Simulator
//!
//! Writes a synthetic set of traceroute observations (as the dashboard API
//! would return them) so the engine can be exercised without a backend.
//!
//! Usage: cargo run --bin trace-sim [output.json]
//!        meshtrace graph --input output.json --source '!11111111' --dest '!22222222'

use chrono::{Duration, Utc};
use std::env;

use meshtrace::node::NodeId;
use meshtrace::route::encoder::RouteBuilder;
use meshtrace::route::RouteObservation;

const SOURCE: NodeId = NodeId(0x11111111);
const DESTINATION: NodeId = NodeId(0x22222222);

fn main() -> anyhow::Result<()> {
    let output = env::args().nth(1);

    // Narrative goes to stderr so stdout stays valid JSON
    eprintln!("Traceroute Simulator");
    eprintln!("  Source: {}", SOURCE);
    eprintln!("  Destination: {}", DESTINATION);
    eprintln!();

    let start = Utc::now();
    let scenarios = vec![
        (
            "Two-hop route heard by gateway A",
            NodeId(0x44444444),
            RouteBuilder::new(vec![NodeId(0x33333333), NodeId(0x3a3a3a3a)])
                .with_snr_towards(vec![26, 9, -14]),
            true,
        ),
        (
            "Same route heard by gateway B",
            NodeId(0x55555555),
            RouteBuilder::new(vec![NodeId(0x33333333), NodeId(0x3a3a3a3a)])
                .with_snr_towards(vec![26, 9, -14]),
            true,
        ),
        (
            "Direct route",
            NodeId(0x66666666),
            RouteBuilder::new(vec![]),
            true,
        ),
        (
            "Partial route that never reached the destination",
            NodeId(0x77777777),
            RouteBuilder::new(vec![NodeId(0x33333333), NodeId(0x5b5b5b5b)]),
            false,
        ),
    ];

    let mut observations = Vec::with_capacity(scenarios.len());
    for (i, (desc, gateway, builder, done)) in scenarios.into_iter().enumerate() {
        let payload = builder.build_hex();

        eprintln!("Observation: {}", desc);
        eprintln!("   Gateway: {}", gateway);
        let shown = if payload.is_empty() {
            "(empty)"
        } else {
            payload.as_str()
        };
        eprintln!("   Payload: {}", shown);
        eprintln!();

        observations.push(RouteObservation {
            gateway_id: gateway,
            route: None,
            payload_hex: Some(payload),
            done,
            observed_at: Some(start + Duration::seconds(i as i64)),
        });
    }

    let json = serde_json::to_string_pretty(&observations)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path, e))?;
            eprintln!("Wrote {} observations to {}", observations.len(), path);
        }
        None => println!("{}", json),
    }

    Ok(())
}

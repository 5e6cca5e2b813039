use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshtrace::config::Config;
use meshtrace::graph::{build_graph, LayoutParams, RouteGraph};
use meshtrace::node::NodeId;
use meshtrace::relay::NodeDirectory;
use meshtrace::route::group::{group_routes, RouteGroup};
use meshtrace::route::{has_route_data, RouteDiscovery, RouteObservation};

#[derive(Parser)]
#[command(name = "meshtrace")]
#[command(about = "Traceroute and relay inference for Meshtastic mesh dashboards")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a hex RouteDiscovery payload
    Decode {
        /// Hex payload
        payload: String,
    },
    /// Group and graph traceroute observations from a JSON file
    Graph {
        /// JSON array of observations (as written by trace-sim)
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        source: NodeId,
        #[arg(long)]
        dest: NodeId,
    },
    /// Fetch and analyse one traceroute request from the API
    #[cfg(feature = "remote")]
    Trace {
        #[arg(long)]
        request_id: u64,
        #[arg(long)]
        source: NodeId,
        #[arg(long)]
        dest: NodeId,
    },
    /// Resolve relay bytes for every gateway that heard a packet
    #[cfg(feature = "remote")]
    Relays {
        #[arg(long)]
        packet_id: u64,
        /// Channel the packet was sent on
        #[arg(long)]
        channel: String,
        /// Query heard history to collapse ambiguous relays
        #[arg(long)]
        refine: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("meshtrace v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Decode { payload } => {
            let discovery = RouteDiscovery::decode_hex(&payload);
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "route": discovery.route,
                        "snr_towards": discovery.snr_towards_db(),
                        "route_back": discovery.route_back,
                        "snr_back": discovery.snr_back_db(),
                    })
                );
            } else {
                println!("{}", discovery);
            }
        }
        Command::Graph {
            input,
            source,
            dest,
        } => {
            let content = std::fs::read_to_string(&input)
                .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", input, e))?;
            let observations: Vec<RouteObservation> = serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse observations: {}", e))?;

            report_traceroute(
                &observations,
                source,
                dest,
                &NodeDirectory::default(),
                &config.layout,
                cli.json,
            )?;
        }
        #[cfg(feature = "remote")]
        Command::Trace {
            request_id,
            source,
            dest,
        } => {
            let client = meshtrace::api::ApiClient::new(config.api.clone())?;
            let (nodes, observations) =
                tokio::try_join!(client.nodes(), client.route_observations(request_id))?;
            let directory = NodeDirectory::new(nodes);

            report_traceroute(
                &observations,
                source,
                dest,
                &directory,
                &config.layout,
                cli.json,
            )?;
        }
        #[cfg(feature = "remote")]
        Command::Relays {
            packet_id,
            channel,
            refine,
        } => {
            relays::run(&config, packet_id, &channel, refine, cli.json).await?;
        }
    }

    Ok(())
}

/// Print grouped routes and the layered graph for one traceroute
fn report_traceroute(
    observations: &[RouteObservation],
    source: NodeId,
    dest: NodeId,
    directory: &NodeDirectory,
    layout: &LayoutParams,
    json: bool,
) -> anyhow::Result<()> {
    if !has_route_data(observations) {
        warn!("No route data for {} -> {}", source, dest);
        println!("No traceroute data");
        return Ok(());
    }

    let groups = group_routes(observations);
    let graph = build_graph(observations, source, dest, directory, layout);

    if json {
        let groups: Vec<serde_json::Value> = groups
            .iter()
            .map(|g| {
                serde_json::json!({
                    "done": g.done,
                    "hops": g.hops,
                    "gateways": g.gateways,
                    "count": g.count,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "routes": groups,
                "graph": graph,
            }))?
        );
        return Ok(());
    }

    println!("Distinct routes ({}):", groups.len());
    for group in &groups {
        println!("  {}", format_group(group, source, dest, directory));
    }

    println!();
    print_graph(&graph);
    Ok(())
}

fn format_group(
    group: &RouteGroup,
    source: NodeId,
    dest: NodeId,
    directory: &NodeDirectory,
) -> String {
    let mut path: Vec<String> = vec![directory.display_name(source)];
    path.extend(group.hops.iter().map(|h| directory.display_name(*h)));
    if group.done {
        path.push(directory.display_name(dest));
    } else {
        path.push("?".to_string());
    }

    format!(
        "{} [{}] x{} via {} gateway(s)",
        path.join(" -> "),
        if group.done { "done" } else { "incomplete" },
        group.count,
        group.gateways.len()
    )
}

fn print_graph(graph: &RouteGraph) {
    println!(
        "Graph: {} nodes, {} edges, {} layers",
        graph.nodes.len(),
        graph.edges.len(),
        graph.depth()
    );
    for node in graph.positioned() {
        if let Some(p) = node.placement {
            println!(
                "  L{} #{} ({:.0},{:.0}) {} {} [{}] seen {}",
                p.layer, p.index, p.x, p.y, node.id, node.name, node.role, node.count
            );
        }
    }

    let unplaced: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.placement.is_none())
        .map(|n| format!("{} [{}]", n.id, n.role))
        .collect();
    if !unplaced.is_empty() {
        println!("  not reachable from source: {}", unplaced.join(", "));
    }

    for edge in &graph.edges {
        println!("  {} -> {} x{}", edge.from, edge.to, edge.count);
    }
}

#[cfg(feature = "remote")]
mod relays {
    use std::collections::HashMap;
    use std::time::Duration;
    use tracing::info;

    use meshtrace::api::ApiClient;
    use meshtrace::config::Config;
    use meshtrace::node::Node;
    use meshtrace::relay::refine::refine_all;
    use meshtrace::relay::{NodeDirectory, RelayMatches};

    /// Phase 1 for every gateway of a packet, optionally followed by a
    /// rate-limited Phase 2 batch
    pub async fn run(
        config: &Config,
        packet_id: u64,
        channel: &str,
        refine: bool,
        json: bool,
    ) -> anyhow::Result<()> {
        let client = ApiClient::new(config.api.clone())?;
        let (nodes, gateways) =
            tokio::try_join!(client.nodes(), client.packet_gateways(packet_id))?;
        let directory = NodeDirectory::new(nodes);

        let mut matches = RelayMatches::for_packet(packet_id);
        for gw in &gateways {
            let Some(byte) = gw.relay_byte() else {
                continue;
            };
            let channel = gw.channel.as_deref().unwrap_or(channel);
            matches.apply(packet_id, gw.gateway_id, directory.candidates(byte, channel));
        }

        info!(
            "{} gateway(s), {} with relay bytes, {} ambiguous",
            gateways.len(),
            matches.iter().count(),
            matches.ambiguous_gateways().len()
        );

        if refine {
            let delay = Duration::from_millis(config.relay.refine_delay_ms);
            let summary = refine_all(&client, &mut matches, delay).await;
            if !json {
                println!(
                    "Refined {} relay(s): {} resolved, {} unchanged, {} failed",
                    summary.attempted, summary.resolved, summary.unchanged, summary.failed
                );
            }
        }

        let receptions: HashMap<_, _> = gateways.iter().map(|g| (g.gateway_id, g)).collect();

        let mut report = Vec::new();
        for (gateway, set) in matches.iter() {
            let reception = receptions.get(&gateway);
            let gateway_pos = directory.get(gateway).and_then(Node::position);
            let ranked = set.ranked(gateway_pos, &directory);

            if json {
                report.push(serde_json::json!({
                    "gateway": gateway,
                    "relay_byte": set.relay_byte,
                    "channel": set.channel,
                    "candidates": ranked,
                    "refinement": set.refinement,
                    "rssi": reception.and_then(|r| r.rssi),
                    "snr": reception.and_then(|r| r.snr),
                    "hop_limit": reception.and_then(|r| r.hop_limit),
                }));
                continue;
            }

            let mut label = format!(
                "{} ({}) relay 0x{:02x}",
                gateway,
                directory.display_name(gateway),
                set.relay_byte
            );
            if let Some(signal) = reception.and_then(|r| r.signal_summary()) {
                label.push_str(&format!(" [{}]", signal));
            }
            if ranked.is_empty() {
                println!("{}: No matching nodes", label);
                continue;
            }

            let names: Vec<String> = ranked
                .iter()
                .map(|c| match c.distance_miles {
                    Some(d) => format!("{} {} ({:.1} mi)", c.node_id, c.name, d),
                    None => format!("{} {}", c.node_id, c.name),
                })
                .collect();

            match &set.refinement {
                Some(r) => println!(
                    "{}: {} [{:?}, {} packets]",
                    label, names[0], r.list, r.packet_count
                ),
                None if ranked.len() == 1 => println!("{}: {}", label, names[0]),
                None => println!("{}: via {}", label, names.join(" or ")),
            }
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Ok(())
    }
}

use depgraph_monitor::config::CaptureConfig;
use depgraph_monitor::export::Exporter;
use depgraph_monitor::network::{pump, NodePopulation, PacketClassifier, ReplaySource};
use depgraph_monitor::{Config, Edge, Graph, GraphSnapshot, Monitor};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::MutableTcpPacket;
use std::net::Ipv4Addr;
use std::sync::Arc;

fn frame(
    protocol: IpNextHeaderProtocol,
    source: Ipv4Addr,
    dest: Ipv4Addr,
    ports: (u16, u16),
    payload: &[u8],
) -> Vec<u8> {
    let ip_len = 20 + 20 + payload.len();
    let mut buf = vec![0u8; 14 + ip_len];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_ethertype(EtherTypes::Ipv4);
    }
    {
        let mut ip = MutableIpv4Packet::new(&mut buf[14..]).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(ip_len as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(protocol);
        ip.set_source(source);
        ip.set_destination(dest);
    }
    {
        let mut tcp = MutableTcpPacket::new(&mut buf[34..]).unwrap();
        tcp.set_source(ports.0);
        tcp.set_destination(ports.1);
        tcp.set_data_offset(5);
    }
    buf[54..].copy_from_slice(payload);
    buf
}

fn traffic() -> Vec<Vec<u8>> {
    let frontend = Ipv4Addr::new(10, 0, 0, 1);
    let api = Ipv4Addr::new(10, 0, 0, 2);
    let db = Ipv4Addr::new(10, 0, 0, 3);

    vec![
        frame(IpNextHeaderProtocols::Tcp, frontend, api, (51000, 8080), b"GET /users"),
        frame(IpNextHeaderProtocols::Tcp, api, frontend, (8080, 51000), b"HTTP/1.1 200"),
        frame(IpNextHeaderProtocols::Tcp, api, db, (40000, 5432), b"SELECT 1"),
        // bare ACK
        frame(IpNextHeaderProtocols::Tcp, frontend, api, (51000, 8080), b""),
        // DNS lookup
        frame(IpNextHeaderProtocols::Udp, api, db, (53000, 53), b"query"),
        frame(IpNextHeaderProtocols::Tcp, frontend, api, (51000, 8080), b"GET /orders"),
    ]
}

#[test]
fn replayed_traffic_builds_expected_graph() {
    let graph = Arc::new(Graph::new());
    let config = CaptureConfig {
        node_population: NodePopulation::Source,
        ..CaptureConfig::default()
    };
    let classifier = PacketClassifier::new(Arc::clone(&graph), &config);

    let stats = pump(&mut ReplaySource::new(traffic()), &classifier).unwrap();
    assert_eq!(stats.frames, 6);
    assert_eq!(stats.edges, 4);

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 4);

    let from_frontend: Vec<String> = graph
        .edges_from("10.0.0.1")
        .into_iter()
        .map(|e| e.dest_address)
        .collect();
    assert_eq!(from_frontend, vec!["10.0.0.2", "10.0.0.2"]);

    let rendered = graph.render();
    assert!(rendered.contains("10.0.0.2 -> 8080 -> 51000 -> 10.0.0.1\n"));
    assert!(rendered.contains("10.0.0.2 -> 40000 -> 5432 -> 10.0.0.3\n"));
    assert_eq!(rendered.lines().count(), 4);
}

#[test]
fn exported_snapshot_matches_graph() {
    let dir = tempfile::tempdir().unwrap();
    let graph = Arc::new(Graph::new());
    let config = CaptureConfig {
        node_population: NodePopulation::Endpoints,
        ..CaptureConfig::default()
    };
    let classifier = PacketClassifier::new(Arc::clone(&graph), &config);
    pump(&mut ReplaySource::new(traffic()), &classifier).unwrap();

    let path = Exporter::new(dir.path()).export_graph(&graph).unwrap();
    let snapshot: GraphSnapshot =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

    assert_eq!(snapshot.nodes.len(), 3);
    assert_eq!(snapshot.edges.len(), 4);
    assert!(snapshot.edges.iter().all(|e| e.protocol == "TCP"));
}

#[tokio::test]
async fn monitor_keeps_edges_until_first_cycle() {
    let mut config = Config::default();
    config.capture.interface = "replay0".to_string();

    let monitor = Monitor::new(config).unwrap();
    let graph = monitor.graph();

    monitor
        .run_with_source(|| Ok(ReplaySource::new(traffic())))
        .await
        .unwrap();

    assert_eq!(graph.edge_count(), 4);
    assert_eq!(graph.node_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_lose_no_edges() {
    let graph = Arc::new(Graph::new());

    let handles: Vec<_> = (0..16u16)
        .map(|task| {
            let graph = Arc::clone(&graph);
            tokio::spawn(async move {
                for i in 0..100u16 {
                    graph.add_edge(Edge {
                        source_address: format!("10.0.{}.1", task % 4),
                        dest_address: "10.0.9.9".to_string(),
                        source_port: i,
                        dest_port: 443,
                        protocol: "TCP".to_string(),
                        length: 60,
                    });
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(graph.edge_count(), 1600);
    assert_eq!(graph.edges_from("10.0.0.1").len(), 400);
}

use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::vlan::VlanPacket;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use crate::config::CaptureConfig;
use crate::graph::{Edge, Graph, Node};
use crate::MonitorError;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const IPV6_MIN_EXTENSION_LEN: usize = 8;
const TCP_MIN_HEADER_LEN: usize = 20;

/// Which endpoints of an accepted edge are also recorded as nodes.
///
/// `External` leaves the node map to an enrichment step outside this process,
/// so only edges accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePopulation {
    #[default]
    External,
    Source,
    Endpoints,
}

impl FromStr for NodePopulation {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "external" => Ok(NodePopulation::External),
            "source" => Ok(NodePopulation::Source),
            "endpoints" => Ok(NodePopulation::Endpoints),
            other => Err(MonitorError::Parse(format!(
                "unknown node population '{}', expected external, source or endpoints",
                other
            ))),
        }
    }
}

struct NetworkLayer<'a> {
    source: IpAddr,
    dest: IpAddr,
    next_protocol: IpNextHeaderProtocol,
    payload: &'a [u8],
}

/// Turns captured Ethernet frames into graph edges.
///
/// Only TCP segments with a non-empty payload over IPv4 or IPv6 qualify.
/// Everything else is dropped without an error.
pub struct PacketClassifier {
    graph: Arc<Graph>,
    verbose: bool,
    node_population: NodePopulation,
}

impl PacketClassifier {
    pub fn new(graph: Arc<Graph>, config: &CaptureConfig) -> Self {
        Self {
            graph,
            verbose: config.verbose,
            node_population: config.node_population,
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Classify a frame and record it in the graph. Returns whether an edge was added.
    pub fn observe(&self, frame: &[u8]) -> bool {
        let edge = match self.classify(frame) {
            Some(edge) => edge,
            None => return false,
        };

        if self.verbose {
            log::info!("{}", edge);
        }

        match self.node_population {
            NodePopulation::External => {}
            NodePopulation::Source => {
                self.graph.add_node(Node::new(edge.source_address.clone()));
            }
            NodePopulation::Endpoints => {
                self.graph.add_node(Node::new(edge.source_address.clone()));
                self.graph.add_node(Node::new(edge.dest_address.clone()));
            }
        }

        self.graph.add_edge(edge);
        true
    }

    /// Decode link, network and transport layers and build the edge, if any.
    pub fn classify(&self, frame: &[u8]) -> Option<Edge> {
        let (ethertype, network) = Self::link_layer(frame)?;

        let ip = match ethertype {
            EtherTypes::Ipv4 => Self::ipv4_layer(network)?,
            EtherTypes::Ipv6 => Self::ipv6_layer(network)?,
            _ => return None,
        };

        if ip.next_protocol != IpNextHeaderProtocols::Tcp {
            return None;
        }

        let tcp = TcpPacket::new(ip.payload)?;
        let header_len = tcp.get_data_offset() as usize * 4;
        if header_len < TCP_MIN_HEADER_LEN || header_len > ip.payload.len() {
            return None;
        }

        // application layer
        if ip.payload.len() == header_len {
            return None;
        }

        Some(Edge {
            source_address: ip.source.to_string(),
            dest_address: ip.dest.to_string(),
            source_port: tcp.get_source(),
            dest_port: tcp.get_destination(),
            protocol: "TCP".to_string(),
            length: frame.len(),
        })
    }

    /// Ethernet header plus any 802.1Q / 802.1ad tags in front of the network layer.
    fn link_layer(frame: &[u8]) -> Option<(EtherType, &[u8])> {
        let ethernet = EthernetPacket::new(frame)?;
        let mut ethertype = ethernet.get_ethertype();
        let mut offset = ETHERNET_HEADER_LEN;

        while matches!(ethertype, EtherTypes::Vlan | EtherTypes::PBridge | EtherTypes::QinQ) {
            let tag = VlanPacket::new(&frame[offset..])?;
            ethertype = tag.get_ethertype();
            offset += VLAN_TAG_LEN;
        }

        Some((ethertype, &frame[offset..]))
    }

    fn ipv4_layer(bytes: &[u8]) -> Option<NetworkLayer<'_>> {
        let ipv4 = Ipv4Packet::new(bytes)?;
        if ipv4.get_version() != 4 {
            return None;
        }

        let header_len = ipv4.get_header_length() as usize * 4;
        // A zero total length shows up on segmentation-offloaded captures.
        let total_len = match ipv4.get_total_length() as usize {
            0 => bytes.len(),
            len => len.min(bytes.len()),
        };
        if header_len < IPV4_MIN_HEADER_LEN || header_len > total_len {
            return None;
        }

        // Fragments carry no decodable transport header of their own.
        if ipv4.get_flags() & Ipv4Flags::MoreFragments != 0 || ipv4.get_fragment_offset() != 0 {
            return None;
        }

        Some(NetworkLayer {
            source: IpAddr::V4(ipv4.get_source()),
            dest: IpAddr::V4(ipv4.get_destination()),
            next_protocol: ipv4.get_next_level_protocol(),
            payload: &bytes[header_len..total_len],
        })
    }

    fn ipv6_layer(bytes: &[u8]) -> Option<NetworkLayer<'_>> {
        let ipv6 = Ipv6Packet::new(bytes)?;
        if ipv6.get_version() != 6 {
            return None;
        }

        let end = match ipv6.get_payload_length() as usize {
            0 => bytes.len(),
            len => (IPV6_HEADER_LEN + len).min(bytes.len()),
        };

        // Hop-by-hop, routing and destination options all share the
        // next-header / length-in-8-octet-units layout. A fragment header ends the walk.
        let mut next_protocol = ipv6.get_next_header();
        let mut offset = IPV6_HEADER_LEN;
        while matches!(
            next_protocol,
            IpNextHeaderProtocols::Hopopt
                | IpNextHeaderProtocols::Ipv6Route
                | IpNextHeaderProtocols::Ipv6Opts
        ) {
            let extension = &bytes[offset..end];
            if extension.len() < IPV6_MIN_EXTENSION_LEN {
                return None;
            }
            let extension_len = (extension[1] as usize + 1) * 8;
            if extension_len > extension.len() {
                return None;
            }
            next_protocol = IpNextHeaderProtocol::new(extension[0]);
            offset += extension_len;
        }

        Some(NetworkLayer {
            source: IpAddr::V6(ipv6.get_source()),
            dest: IpAddr::V6(ipv6.get_destination()),
            next_protocol,
            payload: &bytes[offset..end],
        })
    }
}

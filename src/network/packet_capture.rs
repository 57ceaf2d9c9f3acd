use pnet::datalink::{self, Channel, DataLinkReceiver, NetworkInterface};
use std::collections::VecDeque;
use std::io;
use crate::config::CaptureConfig;
use crate::{MonitorError, Result};
use super::classifier::PacketClassifier;

/// Read buffer per frame, large enough for a standard Ethernet MTU.
pub const SNAPLEN: usize = 1600;

/// A blocking source of link-layer frames.
///
/// `Ok(None)` means the source has closed and no more frames will arrive.
pub trait FrameSource {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>>;
}

impl FrameSource for Box<dyn DataLinkReceiver> {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        self.next().map(Some)
    }
}

/// Replays a fixed list of frames, then reports the source as closed.
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<Vec<u8>>,
    current: Vec<u8>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            current: Vec::new(),
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        match self.frames.pop_front() {
            Some(frame) => {
                self.current = frame;
                Ok(Some(&self.current))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub edges: u64,
}

/// Feed every frame from `source` through the classifier until the source closes.
///
/// A receive error is unrecoverable and ends the capture.
pub fn pump<S>(source: &mut S, classifier: &PacketClassifier) -> Result<CaptureStats>
where
    S: FrameSource + ?Sized,
{
    let mut stats = CaptureStats::default();

    loop {
        match source.next_frame() {
            Ok(Some(frame)) => {
                stats.frames += 1;
                if classifier.observe(frame) {
                    stats.edges += 1;
                }
            }
            Ok(None) => {
                log::info!(
                    "Frame source closed after {} frames ({} edges)",
                    stats.frames,
                    stats.edges
                );
                return Ok(stats);
            }
            Err(e) => {
                return Err(MonitorError::PacketCapture(format!(
                    "Error receiving packet: {}",
                    e
                )));
            }
        }
    }
}

/// Live capture on one network interface.
pub struct PacketCapture {
    interface: NetworkInterface,
    promiscuous: bool,
}

impl PacketCapture {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let interface = Self::find_interface(&config.interface)?;

        Ok(Self {
            interface,
            promiscuous: config.promiscuous,
        })
    }

    pub fn interface_name(&self) -> &str {
        &self.interface.name
    }

    fn find_interface(name: &str) -> Result<NetworkInterface> {
        datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| MonitorError::PacketCapture(format!("Interface {} not found", name)))
    }

    /// Open an Ethernet channel on the interface. Any failure here is fatal.
    pub fn open(&self) -> Result<Box<dyn DataLinkReceiver>> {
        let config = datalink::Config {
            read_buffer_size: SNAPLEN,
            promiscuous: self.promiscuous,
            ..Default::default()
        };

        match datalink::channel(&self.interface, config) {
            Ok(Channel::Ethernet(_, rx)) => {
                log::info!("Capturing on interface {}", self.interface_name());
                Ok(rx)
            }
            Ok(_) => Err(MonitorError::PacketCapture(format!(
                "Unhandled channel type on interface {}",
                self.interface_name()
            ))),
            Err(e) => Err(MonitorError::PacketCapture(format!(
                "Failed to create datalink channel on {}: {}",
                self.interface_name(),
                e
            ))),
        }
    }
}

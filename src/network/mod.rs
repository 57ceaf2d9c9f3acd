pub mod classifier;
pub mod packet_capture;

pub use classifier::{NodePopulation, PacketClassifier};
pub use packet_capture::{pump, CaptureStats, FrameSource, PacketCapture, ReplaySource};

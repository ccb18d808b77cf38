//! Network subsystem for UDP audio transport

pub mod packet;
pub mod sender;
pub mod udp;

pub use packet::AudioPacket;
pub use sender::{AudioSender, SenderStats};
pub use udp::{create_socket, ReceivedPacket, UdpSendHandle, UdpServer, UdpStats};

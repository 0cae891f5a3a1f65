//! The packet and flow model shared by the classifier, the queueing framework and the
//! disciplines.
//!
//! A [`Packet`] is an outbound network-layer datagram plus the attributes the queueing layer
//! attaches to it. A [`Flow`] is the descriptor extracted from the headers for classification.

mod build;
pub use build::PacketBuilder;

mod dsfield;
pub use dsfield::{clear_dsfield, read_dsfield, write_dsfield};

mod flow;
pub use flow::{Flow, FlowExtractor, FlowV4, FlowV6, FRAG_CACHE_SIZE};

mod packet;
pub use packet::{AddressFamily, ClassHandle, Packet};

/// IP protocol numbers the flow extractor understands.
pub mod proto {
    pub const HOPOPTS: u8 = 0;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const ROUTING: u8 = 43;
    pub const FRAGMENT: u8 = 44;
    pub const ESP: u8 = 50;
    pub const AH: u8 = 51;
    pub const DSTOPTS: u8 = 60;
}

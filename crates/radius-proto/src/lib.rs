//! RADIUS Protocol Types
//!
//! Packet model, wire codec and authenticator calculation for the subset of
//! RADIUS the edge proxy speaks: RFC 2865 authentication, RFC 2866
//! accounting and RFC 5176 dynamic authorization (CoA and Disconnect).
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Attribute, AttributeType, Code, Packet};
//! use radius_proto::auth::calculate_hashed_request_authenticator;
//!
//! let mut packet = Packet::new(Code::DisconnectRequest, 1, [0u8; 16]);
//! packet.add_attribute(
//!     Attribute::string(AttributeType::CallingStationId as u8, "aa-bb-cc-dd-ee-ff").unwrap()
//! );
//! packet.authenticator = calculate_hashed_request_authenticator(&packet, b"secret");
//!
//! let bytes = packet.encode().unwrap();
//! assert_eq!(Packet::decode(&bytes).unwrap(), packet);
//! ```

pub mod attributes;
pub mod auth;
pub mod packet;

pub use attributes::{Attribute, AttributeType};
pub use auth::{
    calculate_hashed_request_authenticator, calculate_response_authenticator,
    generate_request_authenticator, verify_hashed_request_authenticator,
    verify_response_authenticator,
};
pub use packet::{Code, Packet, PacketError};

use crate::packet::Packet;
use rand::Rng;

/// Random Request Authenticator for Access-Request and Status-Server (RFC 2865 Section 3)
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// MD5(Code + Identifier + Length + `authenticator` + Attributes + Secret)
fn packet_digest(packet: &Packet, authenticator: &[u8; 16], secret: &[u8]) -> [u8; 16] {
    let length = packet.length();
    let mut data = Vec::with_capacity(length + secret.len());

    data.push(packet.code.as_u8());
    data.push(packet.identifier);
    data.extend_from_slice(&(length as u16).to_be_bytes());
    data.extend_from_slice(authenticator);
    for attr in &packet.attributes {
        data.push(attr.attr_type);
        data.push(attr.encoded_length() as u8);
        data.extend_from_slice(&attr.value);
    }
    data.extend_from_slice(secret);

    md5::compute(&data).0
}

/// Response Authenticator (RFC 2865 Section 3)
///
/// Used for every reply code, including Accounting-Response and the
/// RFC 5176 ACK/NAK codes.
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    packet_digest(packet, request_authenticator, secret)
}

pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    calculate_response_authenticator(response, request_authenticator, secret)
        == response.authenticator
}

/// Request Authenticator for Accounting-Request (RFC 2866 Section 3) and
/// CoA/Disconnect-Request (RFC 5176 Section 2.3)
///
/// The authenticator field is taken as 16 zero octets while hashing.
pub fn calculate_hashed_request_authenticator(packet: &Packet, secret: &[u8]) -> [u8; 16] {
    packet_digest(packet, &[0u8; 16], secret)
}

pub fn verify_hashed_request_authenticator(packet: &Packet, secret: &[u8]) -> bool {
    calculate_hashed_request_authenticator(packet, secret) == packet.authenticator
}

/// Attribute types the edge proxy reads or writes
///
/// Anything else is carried through as an opaque [`Attribute`](super::Attribute)
/// with its raw type octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    UserName = 1,
    /// IPv4 address of the NAS; names the CoA target for stateless routing
    NasIpAddress = 4,
    ReplyMessage = 18,
    State = 24,
    Class = 25,
    /// Access point or port the subscriber attached to; first half of the session key
    CalledStationId = 30,
    /// Subscriber device identifier; second half of the session key
    CallingStationId = 31,
    NasIdentifier = 32,
    ProxyState = 33,
    AcctSessionId = 44,
    /// RFC 5176 Section 3.6
    EventTimestamp = 55,
    MessageAuthenticator = 80,
    /// RFC 5176 Section 3.5
    ErrorCause = 101,
}

impl TryFrom<u8> for AttributeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use AttributeType::*;
        [
            UserName,
            NasIpAddress,
            ReplyMessage,
            State,
            Class,
            CalledStationId,
            CallingStationId,
            NasIdentifier,
            ProxyState,
            AcctSessionId,
            EventTimestamp,
            MessageAuthenticator,
            ErrorCause,
        ]
        .into_iter()
        .find(|t| *t as u8 == value)
        .ok_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from() {
        assert_eq!(AttributeType::try_from(31), Ok(AttributeType::CallingStationId));
        assert_eq!(AttributeType::try_from(101), Ok(AttributeType::ErrorCause));
        assert_eq!(AttributeType::try_from(26), Err(26));
    }
}

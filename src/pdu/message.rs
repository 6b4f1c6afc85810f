use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{CoapError, CoapResult};
use crate::pdu::code::Code;
use crate::pdu::option::{decode_uint, CoapOption, OptionList, OptionNumber, MAX_OBSERVE_SEQUENCE};
use crate::token::Token;


pub const DEFAULT_MAX_AGE_SECONDS: u32 = 60;

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

/// Upper bounds for reconstructing the URI path and query of a received message
#[derive(Debug, Clone, Copy)]
pub struct UriLimits {
    pub max_uri_length: usize,
    pub max_query_length: usize,
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Token,
    pub options: OptionList,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(message_type: MessageType, code: Code, message_id: u16, token: Token) -> Message {
        Message {
            message_type,
            code,
            message_id,
            token,
            options: OptionList::new(),
            payload: Vec::new(),
        }
    }

    pub fn empty_ack(message_id: u16) -> Message {
        Message::new(MessageType::Acknowledgement, Code::EMPTY, message_id, Token::EMPTY)
    }

    pub fn reset(message_id: u16) -> Message {
        Message::new(MessageType::Reset, Code::EMPTY, message_id, Token::EMPTY)
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Message {
        self.payload = payload.into();
        self
    }

    pub fn with_option(mut self, option: CoapOption) -> Message {
        self.options.insert(option);
        self
    }

    /// adds one Uri-Path option per `/` separated segment and one Uri-Query option per `&`
    ///  separated query parameter
    pub fn with_uri(mut self, path: &str, query: &str) -> Message {
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.options.insert(CoapOption::new(OptionNumber::URI_PATH, segment.as_bytes()));
        }
        for param in query.split('&').filter(|s| !s.is_empty()) {
            self.options.insert(CoapOption::new(OptionNumber::URI_QUERY, param.as_bytes()));
        }
        self
    }

    pub fn is_confirmable(&self) -> bool {
        self.message_type == MessageType::Confirmable
    }

    /// the Uri-Path segments joined with `/` and prefixed with `/`, or an empty string if there
    ///  are no Uri-Path options
    pub fn uri_path(&self, limits: &UriLimits) -> CoapResult<String> {
        let mut result = String::new();
        for option in self.options.get_all(OptionNumber::URI_PATH) {
            result.push('/');
            result.push_str(utf8(&option.value)?);
        }
        check_capacity(&result, limits.max_uri_length)?;
        Ok(result)
    }

    /// the Uri-Query segments joined with `&`
    pub fn uri_query(&self, limits: &UriLimits) -> CoapResult<String> {
        let mut result = String::new();
        for option in self.options.get_all(OptionNumber::URI_QUERY) {
            if !result.is_empty() {
                result.push('&');
            }
            result.push_str(utf8(&option.value)?);
        }
        check_capacity(&result, limits.max_query_length)?;
        Ok(result)
    }

    pub fn observe(&self) -> CoapResult<Option<u32>> {
        self.options.get_first(OptionNumber::OBSERVE)
            .map(|o| decode_uint(&o.value, 3))
            .transpose()
    }

    pub fn max_age(&self) -> CoapResult<u32> {
        match self.options.get_first(OptionNumber::MAX_AGE) {
            None => Ok(DEFAULT_MAX_AGE_SECONDS),
            Some(o) => decode_uint(&o.value, 4),
        }
    }

    pub fn set_observe(&mut self, sequence_number: u32) {
        self.options.remove_all(OptionNumber::OBSERVE);
        self.options.insert(CoapOption::uint(OptionNumber::OBSERVE, sequence_number & MAX_OBSERVE_SEQUENCE));
    }
}

fn utf8(raw: &[u8]) -> CoapResult<&str> {
    std::str::from_utf8(raw)
        .map_err(|_| CoapError::MalformedMessage("uri segment is not valid UTF-8"))
}

fn check_capacity(s: &str, capacity: usize) -> CoapResult<()> {
    if s.len() > capacity {
        return Err(CoapError::BufferTooSmall { required: s.len(), capacity });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    const LIMITS: UriLimits = UriLimits { max_uri_length: 16, max_query_length: 8 };

    fn get(path: &str, query: &str) -> Message {
        Message::new(MessageType::Confirmable, Code::GET, 1, Token::EMPTY)
            .with_uri(path, query)
    }

    #[rstest]
    #[case::none("", "", Ok("".to_string()))]
    #[case::single("/a", "", Ok("/a".to_string()))]
    #[case::nested("/a/led", "", Ok("/a/led".to_string()))]
    #[case::exact_capacity("/0123456789abcde", "", Ok("/0123456789abcde".to_string()))]
    #[case::too_long("/0123456789abcdef", "", Err(CoapError::BufferTooSmall { required: 17, capacity: 16 }))]
    fn test_uri_path(#[case] path: &str, #[case] query: &str, #[case] expected: CoapResult<String>) {
        assert_eq!(get(path, query).uri_path(&LIMITS), expected);
    }

    #[rstest]
    #[case::none("", Ok("".to_string()))]
    #[case::single("if=a", Ok("if=a".to_string()))]
    #[case::joined("a=1&b=2", Ok("a=1&b=2".to_string()))]
    #[case::too_long("a=1&b=222", Err(CoapError::BufferTooSmall { required: 9, capacity: 8 }))]
    fn test_uri_query(#[case] query: &str, #[case] expected: CoapResult<String>) {
        assert_eq!(get("/a", query).uri_query(&LIMITS), expected);
    }

    #[test]
    fn test_uri_path_rejects_invalid_utf8() {
        let msg = get("", "").with_option(CoapOption::new(OptionNumber::URI_PATH, vec![0xff, 0xfe]));
        assert_eq!(msg.uri_path(&LIMITS), Err(CoapError::MalformedMessage("uri segment is not valid UTF-8")));
    }

    #[rstest]
    #[case::absent(None, Ok(None))]
    #[case::zero(Some(b"".to_vec()), Ok(Some(0)))]
    #[case::three_bytes(Some(b"\x01\x00\x00".to_vec()), Ok(Some(0x10000)))]
    #[case::four_bytes(Some(b"\x01\x00\x00\x00".to_vec()), Err(CoapError::MalformedMessage("unsigned integer option is too long")))]
    fn test_observe(#[case] raw: Option<Vec<u8>>, #[case] expected: CoapResult<Option<u32>>) {
        let mut msg = get("", "");
        if let Some(raw) = raw {
            msg = msg.with_option(CoapOption::new(OptionNumber::OBSERVE, raw));
        }
        assert_eq!(msg.observe(), expected);
    }

    #[rstest]
    #[case::absent(None, Some(DEFAULT_MAX_AGE_SECONDS))]
    #[case::zero(Some(0), Some(0))]
    #[case::large(Some(0x2ffff), Some(0x2ffff))]
    fn test_max_age(#[case] max_age: Option<u32>, #[case] expected: Option<u32>) {
        let mut msg = get("", "");
        if let Some(max_age) = max_age {
            msg = msg.with_option(CoapOption::uint(OptionNumber::MAX_AGE, max_age));
        }
        assert_eq!(msg.max_age().ok(), expected);
    }

    #[test]
    fn test_set_observe_replaces_previous_value() {
        let mut msg = get("/a", "");
        msg.set_observe(3);
        msg.set_observe(4);
        assert_eq!(msg.observe(), Ok(Some(4)));
        assert_eq!(msg.options.get_all(OptionNumber::OBSERVE).count(), 1);
    }
}

use crate::error::{CoapError, CoapResult};


#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    pub const OBSERVE: OptionNumber = OptionNumber(6);
    pub const URI_PATH: OptionNumber = OptionNumber(11);
    pub const CONTENT_FORMAT: OptionNumber = OptionNumber(12);
    pub const MAX_AGE: OptionNumber = OptionNumber(14);
    pub const URI_QUERY: OptionNumber = OptionNumber(15);
}

pub const MEDIA_TYPE_APPLICATION_JSON: u32 = 50;

/// Observe option value of a request registering an observer
pub const OBSERVE_REGISTER: u32 = 0;
/// Observe option value of a request deregistering an observer
pub const OBSERVE_DEREGISTER: u32 = 1;

/// Observe carries at most three bytes on the wire
pub const MAX_OBSERVE_SEQUENCE: u32 = 0x00ff_ffff;


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoapOption {
    pub number: OptionNumber,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: OptionNumber, value: impl Into<Vec<u8>>) -> CoapOption {
        CoapOption {
            number,
            value: value.into(),
        }
    }

    pub fn uint(number: OptionNumber, value: u32) -> CoapOption {
        CoapOption::new(number, encode_uint(value))
    }
}


/// Options of a message, kept in ascending order of their number. The wire format encodes
///  each option number as a delta from its predecessor, so the order is an invariant rather
///  than a convenience.
///
/// Options with equal numbers keep their insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OptionList(Vec<CoapOption>);

impl OptionList {
    pub fn new() -> OptionList {
        Default::default()
    }

    pub fn insert(&mut self, option: CoapOption) {
        let idx = self.0.partition_point(|o| o.number <= option.number);
        self.0.insert(idx, option);
    }

    /// appends without sorting - callers guarantee ascending option numbers
    pub(crate) fn push_in_order(&mut self, option: CoapOption) {
        debug_assert!(self.0.last().map(|o| o.number <= option.number).unwrap_or(true));
        self.0.push(option);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoapOption> {
        self.0.iter()
    }

    pub fn get_all(&self, number: OptionNumber) -> impl Iterator<Item = &CoapOption> {
        self.0.iter()
            .filter(move |o| o.number == number)
    }

    pub fn get_first(&self, number: OptionNumber) -> Option<&CoapOption> {
        self.get_all(number).next()
    }

    pub fn remove_all(&mut self, number: OptionNumber) {
        self.0.retain(|o| o.number != number);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// minimal big-endian representation, zero being the empty byte sequence
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first_non_zero = bytes.iter()
        .position(|&b| b != 0)
        .unwrap_or(bytes.len());
    bytes[first_non_zero..].to_vec()
}

pub fn decode_uint(value: &[u8], max_len: usize) -> CoapResult<u32> {
    if value.len() > max_len {
        return Err(CoapError::MalformedMessage("unsigned integer option is too long"));
    }
    Ok(value.iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::zero(0, b"")]
    #[case::one_byte(0x12, b"\x12")]
    #[case::two_bytes(0x1234, b"\x12\x34")]
    #[case::three_bytes(0x010000, b"\x01\x00\x00")]
    #[case::four_bytes(0x2ffff_u32 << 8, b"\x02\xff\xff\x00")]
    fn test_encode_uint(#[case] value: u32, #[case] expected: &[u8]) {
        assert_eq!(encode_uint(value), expected.to_vec());
    }

    #[rstest]
    #[case::empty(b"", 3, Some(0))]
    #[case::three_bytes(b"\x01\x02\x03", 3, Some(0x010203))]
    #[case::too_long(b"\x01\x02\x03\x04", 3, None)]
    #[case::four_bytes_allowed(b"\x01\x02\x03\x04", 4, Some(0x01020304))]
    fn test_decode_uint(#[case] value: &[u8], #[case] max_len: usize, #[case] expected: Option<u32>) {
        assert_eq!(decode_uint(value, max_len).ok(), expected);
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let mut options = OptionList::new();
        options.insert(CoapOption::new(OptionNumber::URI_QUERY, b"q".to_vec()));
        options.insert(CoapOption::new(OptionNumber::OBSERVE, b"".to_vec()));
        options.insert(CoapOption::new(OptionNumber::URI_PATH, b"a".to_vec()));

        let numbers = options.iter().map(|o| o.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![OptionNumber::OBSERVE, OptionNumber::URI_PATH, OptionNumber::URI_QUERY]);
    }

    #[test]
    fn test_insert_is_stable_for_equal_numbers() {
        let mut options = OptionList::new();
        options.insert(CoapOption::new(OptionNumber::URI_PATH, b"a".to_vec()));
        options.insert(CoapOption::new(OptionNumber::OBSERVE, b"".to_vec()));
        options.insert(CoapOption::new(OptionNumber::URI_PATH, b"led".to_vec()));
        options.insert(CoapOption::new(OptionNumber::URI_PATH, b"1".to_vec()));

        let segments = options.get_all(OptionNumber::URI_PATH)
            .map(|o| o.value.clone())
            .collect::<Vec<_>>();
        assert_eq!(segments, vec![b"a".to_vec(), b"led".to_vec(), b"1".to_vec()]);
    }
}

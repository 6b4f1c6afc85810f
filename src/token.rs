use std::fmt::{Debug, Formatter};

use crate::error::{CoapError, CoapResult};
use crate::util::random::Random;


pub const MAX_TOKEN_LENGTH: usize = 8;

/// Opaque correlation identifier chosen by the requester, echoed by the peer in every response
///  and notification belonging to the same exchange. It is independent of the message id, which
///  only correlates a confirmable message with its acknowledgement.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct Token {
    len: u8,
    bytes: [u8; MAX_TOKEN_LENGTH],
}

impl Token {
    pub const EMPTY: Token = Token { len: 0, bytes: [0; MAX_TOKEN_LENGTH] };

    pub fn new(bytes: &[u8]) -> CoapResult<Token> {
        if bytes.len() > MAX_TOKEN_LENGTH {
            return Err(CoapError::MalformedMessage("token is longer than 8 bytes"));
        }
        let mut result = Token::EMPTY;
        result.len = bytes.len() as u8;
        result.bytes[..bytes.len()].copy_from_slice(bytes);
        Ok(result)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(")?;
        for b in self.as_bytes() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}


/// Mints tokens of a fixed length from a random source.
///
/// NB: the generator does not guarantee uniqueness. The transaction table rejects a token
///      that is in use by a live transaction, and the caller generates a new one then.
pub struct TokenGenerator {
    token_length: usize,
}

impl TokenGenerator {
    pub fn new(token_length: usize) -> TokenGenerator {
        assert!(token_length <= MAX_TOKEN_LENGTH, "token length must be at most {} bytes", MAX_TOKEN_LENGTH);
        TokenGenerator {
            token_length,
        }
    }

    pub fn generate_token(&self, random: &mut dyn Random) -> Token {
        let mut result = Token::EMPTY;
        result.len = self.token_length as u8;
        random.fill_bytes(&mut result.bytes[..self.token_length]);
        result
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use rustc_hash::FxHashSet;

    use crate::util::random::{MockRandom, SeededRandom};
    use super::*;

    #[rstest]
    #[case::empty(b"", "Token()")]
    #[case::bytes(b"\x01\xab", "Token(01ab)")]
    fn test_token_debug(#[case] bytes: &[u8], #[case] expected: &str) {
        assert_eq!(format!("{:?}", Token::new(bytes).unwrap()), expected);
    }

    #[test]
    fn test_token_too_long() {
        assert!(Token::new(b"123456789").is_err());
    }

    #[test]
    fn test_token_equality_requires_equal_length() {
        let short = Token::new(b"\x01").unwrap();
        let long = Token::new(b"\x01\x00").unwrap();
        assert_ne!(short, long);
    }

    #[test]
    fn test_generate_token_uses_random_source() {
        let mut random = MockRandom::new();
        random.expect_fill_bytes()
            .times(1)
            .returning(|buf| buf.copy_from_slice(&[1, 2, 3, 4]));

        let token = TokenGenerator::new(4).generate_token(&mut random);
        assert_eq!(token.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_generated_tokens_are_distinct_for_fixed_seed() {
        let generator = TokenGenerator::new(MAX_TOKEN_LENGTH);
        let mut random = SeededRandom::new(4711);

        let tokens = (0..1000)
            .map(|_| generator.generate_token(&mut random))
            .collect::<FxHashSet<_>>();
        assert_eq!(tokens.len(), 1000);
    }
}

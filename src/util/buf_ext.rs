use bytes::Buf;

use crate::error::{CoapError, CoapResult};


/// Checked reads on a [Buf], failing with [CoapError::MalformedMessage] instead of panicking
///  when the wire data is shorter than announced.
macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> CoapResult<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return Err(CoapError::MalformedMessage("buffer underflow"));
            }
            Ok(self.$getter())
        }
    }
}

pub trait BufExt: Buf {
    get_try_impl!(try_read_u8, u8, get_u8);
    get_try_impl!(try_read_u16, u16, get_u16);

    fn try_read_slice(&mut self, len: usize) -> CoapResult<Vec<u8>> {
        if self.remaining() < len {
            return Err(CoapError::MalformedMessage("buffer underflow"));
        }
        let mut result = vec![0u8; len];
        self.copy_to_slice(&mut result);
        Ok(result)
    }
}

impl <T: Buf> BufExt for T {
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::u8_ok(b"\x12", Some(0x12))]
    #[case::u8_empty(b"", None)]
    fn test_try_read_u8(#[case] mut buf: &[u8], #[case] expected: Option<u8>) {
        assert_eq!(buf.try_read_u8().ok(), expected);
    }

    #[rstest]
    #[case::u16_ok(b"\x12\x34", Some(0x1234))]
    #[case::u16_short(b"\x12", None)]
    fn test_try_read_u16(#[case] mut buf: &[u8], #[case] expected: Option<u16>) {
        assert_eq!(buf.try_read_u16().ok(), expected);
    }

    #[rstest]
    #[case::exact(b"abc", 3, Some(b"abc".to_vec()), b"")]
    #[case::remainder(b"abcd", 2, Some(b"ab".to_vec()), b"cd")]
    #[case::too_short(b"ab", 3, None, b"ab")]
    fn test_try_read_slice(#[case] mut buf: &[u8], #[case] len: usize, #[case] expected: Option<Vec<u8>>, #[case] buf_after: &[u8]) {
        assert_eq!(buf.try_read_slice(len).ok(), expected);
        assert_eq!(buf, buf_after);
    }
}

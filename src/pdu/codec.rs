//! Wire format of a message, all numbers in network byte order:
//!
//! ```ascii
//!     0                   1                   2                   3
//!     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!    |Ver| T |  TKL  |      Code     |          Message ID           |
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!    |   Token (if any, TKL bytes) ...
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!    |   Options (if any) ...
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!    |1 1 1 1 1 1 1 1|    Payload (if any) ...
//!    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Each option starts with a byte holding two nibbles: the delta from the previous option's
//!  number and the length of the option's value. Nibble values 13 and 14 announce one or two
//!  extension bytes (offset by 13 and 269 respectively), 15 is reserved for the payload marker.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{CoapError, CoapResult};
use crate::pdu::code::Code;
use crate::pdu::message::{Message, MessageType};
use crate::pdu::option::{CoapOption, OptionList, OptionNumber};
use crate::token::{Token, MAX_TOKEN_LENGTH};
use crate::util::buf_ext::BufExt;


pub const PROTOCOL_VERSION: u8 = 1;
pub const PAYLOAD_MARKER: u8 = 0xff;

const HEADER_LEN: usize = 4;
const MAX_EXTENDED_NIBBLE_VALUE: usize = 269 + u16::MAX as usize;

pub fn encode(msg: &Message) -> CoapResult<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.token.len() + msg.payload.len() + 16);

    let message_type: u8 = msg.message_type.into();
    buf.put_u8((PROTOCOL_VERSION << 6) | (message_type << 4) | msg.token.len() as u8);
    buf.put_u8(msg.code.0);
    buf.put_u16(msg.message_id);
    buf.put_slice(msg.token.as_bytes());

    let mut prev_number = 0u16;
    for option in msg.options.iter() {
        let delta = (option.number.0 - prev_number) as usize;
        write_option_header(&mut buf, delta, option.value.len())?;
        buf.put_slice(&option.value);
        prev_number = option.number.0;
    }

    if !msg.payload.is_empty() {
        buf.put_u8(PAYLOAD_MARKER);
        buf.put_slice(&msg.payload);
    }

    trace!(len = buf.len(), "encoded message {:?}", msg);
    Ok(buf.freeze())
}

fn write_option_header(buf: &mut BytesMut, delta: usize, len: usize) -> CoapResult<()> {
    if len > MAX_EXTENDED_NIBBLE_VALUE {
        return Err(CoapError::MalformedMessage("option value is too long"));
    }

    let (delta_nibble, delta_ext) = nibble(delta);
    let (len_nibble, len_ext) = nibble(len);

    buf.put_u8((delta_nibble << 4) | len_nibble);
    put_extension(buf, delta_ext);
    put_extension(buf, len_ext);
    Ok(())
}

enum Extension {
    None,
    OneByte(u8),
    TwoBytes(u16),
}

fn nibble(value: usize) -> (u8, Extension) {
    match value {
        0..=12 => (value as u8, Extension::None),
        13..=268 => (13, Extension::OneByte((value - 13) as u8)),
        _ => (14, Extension::TwoBytes((value - 269) as u16)),
    }
}

fn put_extension(buf: &mut BytesMut, ext: Extension) {
    match ext {
        Extension::None => {}
        Extension::OneByte(b) => buf.put_u8(b),
        Extension::TwoBytes(w) => buf.put_u16(w),
    }
}

pub fn decode(mut buf: &[u8]) -> CoapResult<Message> {
    if buf.len() < HEADER_LEN {
        return Err(CoapError::MalformedMessage("truncated header"));
    }

    let first = buf.get_u8();
    if first >> 6 != PROTOCOL_VERSION {
        return Err(CoapError::MalformedMessage("unsupported protocol version"));
    }
    let message_type = MessageType::try_from((first >> 4) & 0x03)
        .map_err(|_| CoapError::MalformedMessage("invalid message type"))?;
    let token_len = (first & 0x0f) as usize;
    if token_len > MAX_TOKEN_LENGTH {
        return Err(CoapError::MalformedMessage("invalid token length"));
    }

    let code = Code(buf.get_u8());
    let message_id = buf.get_u16();

    let token = buf.try_read_slice(token_len)
        .map_err(|_| CoapError::MalformedMessage("truncated token"))?;
    let token = Token::new(&token)?;

    let mut options = OptionList::new();
    let mut payload = Vec::new();
    let mut prev_number = 0usize;

    while buf.has_remaining() {
        let option_header = buf.get_u8();
        if option_header == PAYLOAD_MARKER {
            if !buf.has_remaining() {
                return Err(CoapError::MalformedMessage("payload marker without payload"));
            }
            payload = buf.to_vec();
            break;
        }

        let delta = read_nibble_value(&mut buf, option_header >> 4)?;
        let len = read_nibble_value(&mut buf, option_header & 0x0f)?;

        let number = prev_number + delta;
        if number > u16::MAX as usize {
            return Err(CoapError::MalformedMessage("option number out of range"));
        }
        if buf.remaining() < len {
            return Err(CoapError::MalformedMessage("option length exceeds message"));
        }
        let value = buf.try_read_slice(len)?;

        options.push_in_order(CoapOption::new(OptionNumber(number as u16), value));
        prev_number = number;
    }

    if code.is_empty() && (!token.is_empty() || !options.is_empty() || !payload.is_empty()) {
        return Err(CoapError::MalformedMessage("empty message with content"));
    }

    Ok(Message {
        message_type,
        code,
        message_id,
        token,
        options,
        payload,
    })
}

fn read_nibble_value(buf: &mut &[u8], nibble: u8) -> CoapResult<usize> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => Ok(buf.try_read_u8()? as usize + 13),
        14 => Ok(buf.try_read_u16()? as usize + 269),
        _ => Err(CoapError::MalformedMessage("reserved option nibble")),
    }
}

//! Thrift compact protocol (spec.md §4.5 "compact" variant).
//!
//! Varint/zigzag integers and field-id delta encoding shrink the wire
//! size at the cost of per-struct state: a field header only carries the
//! *difference* from the previous field id seen inside the current
//! struct, so decoding one requires remembering where the last field left
//! off. `frame_stack` holds that "last field id" per currently-open
//! struct, pushed on `read_struct_begin`/popped on `read_struct_end` —
//! the same nested-scope-as-a-stack shape `balancer::manager`'s retired/
//! available bookkeeping uses for per-connection state, generalized here
//! to protocol framing depth instead of connection lifecycle.

use super::{peek_copy, take, DecodeError, FieldHeader, FieldType, ListHeader, MapHeader, MessageHeader, MessageType, Protocol};
use buffer::Buffer;

const PROTOCOL_ID: u8 = 0x82;
const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const TYPE_SHIFT: u8 = 5;
const TYPE_MASK: u8 = 0xe0;

const TYPE_BOOLEAN_TRUE: u8 = 0x01;
const TYPE_BOOLEAN_FALSE: u8 = 0x02;
const TYPE_BYTE: u8 = 0x03;
const TYPE_I16: u8 = 0x04;
const TYPE_I32: u8 = 0x05;
const TYPE_I64: u8 = 0x06;
const TYPE_DOUBLE: u8 = 0x07;
const TYPE_BINARY: u8 = 0x08;
const TYPE_LIST: u8 = 0x09;
const TYPE_SET: u8 = 0x0a;
const TYPE_MAP: u8 = 0x0b;
const TYPE_STRUCT: u8 = 0x0c;

fn compact_type(field_type: FieldType) -> u8 {
    match field_type {
        FieldType::Stop => 0,
        // Only meaningful for list/set/map element types, where the actual
        // value is never embedded in a header nibble. Struct fields go
        // through the write_field_begin/write_bool deferral below instead.
        FieldType::Bool => TYPE_BOOLEAN_TRUE,
        FieldType::Byte => TYPE_BYTE,
        FieldType::I16 => TYPE_I16,
        FieldType::I32 => TYPE_I32,
        FieldType::I64 => TYPE_I64,
        FieldType::Double => TYPE_DOUBLE,
        FieldType::String => TYPE_BINARY,
        FieldType::List => TYPE_LIST,
        FieldType::Set => TYPE_SET,
        FieldType::Map => TYPE_MAP,
        FieldType::Struct => TYPE_STRUCT,
        FieldType::Void => TYPE_BYTE,
    }
}

fn canonical_type(compact: u8) -> Result<FieldType, DecodeError> {
    match compact {
        0 => Ok(FieldType::Stop),
        TYPE_BOOLEAN_TRUE | TYPE_BOOLEAN_FALSE => Ok(FieldType::Bool),
        TYPE_BYTE => Ok(FieldType::Byte),
        TYPE_I16 => Ok(FieldType::I16),
        TYPE_I32 => Ok(FieldType::I32),
        TYPE_I64 => Ok(FieldType::I64),
        TYPE_DOUBLE => Ok(FieldType::Double),
        TYPE_BINARY => Ok(FieldType::String),
        TYPE_LIST => Ok(FieldType::List),
        TYPE_SET => Ok(FieldType::Set),
        TYPE_MAP => Ok(FieldType::Map),
        TYPE_STRUCT => Ok(FieldType::Struct),
        other => Err(DecodeError::Malformed(format!("unknown compact type {}", other))),
    }
}

fn zigzag_encode_32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}
fn zigzag_decode_32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}
fn zigzag_encode_64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}
fn zigzag_decode_64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Reads a base-128 varint from the front of `buf` without consuming
/// anything if the terminating byte hasn't arrived yet. Bounded at 10
/// bytes, the most a 64-bit varint can take.
fn read_varint_u64(buf: &mut Buffer) -> Result<u64, DecodeError> {
    let window = buf.len().min(10);
    if window == 0 {
        return Err(DecodeError::NeedMore);
    }
    let bytes = peek_copy(buf, window)?;
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            take(buf, i + 1)?;
            return Ok(value);
        }
    }
    if window == 10 {
        return Err(DecodeError::Malformed("varint longer than 10 bytes".to_string()));
    }
    Err(DecodeError::NeedMore)
}

fn write_varint_u64(out: &mut Vec<u8>, mut value: u64) {
    loop {
        if value & !0x7f == 0 {
            out.push(value as u8);
            return;
        }
        out.push(((value & 0x7f) | 0x80) as u8);
        value >>= 7;
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompactProtocol {
    frame_stack: Vec<i16>,
    // Set by read_field_begin when a struct field's type nibble already
    // carries the bool value, so read_bool can consume it without a wire
    // byte of its own.
    pending_bool: Option<bool>,
    // Set by write_field_begin for a Bool field: the header byte can't be
    // written until write_bool supplies the value to embed, so the field
    // id/delta are held here instead.
    pending_write_field: Option<FieldHeader>,
}

impl CompactProtocol {
    pub fn new() -> CompactProtocol {
        CompactProtocol::default()
    }

    fn last_field_id(&self) -> i16 {
        *self.frame_stack.last().unwrap_or(&0)
    }
}

impl Protocol for CompactProtocol {
    fn name(&self) -> String {
        "compact".to_string()
    }

    fn read_message_begin(&mut self, buf: &mut Buffer) -> Result<MessageHeader, DecodeError> {
        let prefix = peek_copy(buf, 2)?;
        if prefix[0] != PROTOCOL_ID {
            return Err(DecodeError::Malformed(format!("invalid compact protocol id {:#x}", prefix[0])));
        }
        if prefix[1] & VERSION_MASK != VERSION {
            return Err(DecodeError::Malformed("unsupported compact protocol version".to_string()));
        }
        let raw_type = (prefix[1] & TYPE_MASK) >> TYPE_SHIFT;
        let message_type = MessageType::from_i8(raw_type as i8).ok_or_else(|| DecodeError::Malformed("invalid compact protocol message type".to_string()))?;

        take(buf, 2)?;
        let seq_id = zigzag_decode_32(read_varint_u64(buf)? as u32);
        let name_len = read_varint_u64(buf)? as usize;
        let name = String::from_utf8(take(buf, name_len)?.to_vec()).map_err(|e| DecodeError::Malformed(format!("message name is not valid utf-8: {}", e)))?;
        Ok(MessageHeader { name, message_type, seq_id })
    }

    fn read_struct_begin(&mut self, _buf: &mut Buffer) -> Result<(), DecodeError> {
        self.frame_stack.push(0);
        Ok(())
    }

    fn read_struct_end(&mut self, _buf: &mut Buffer) -> Result<(), DecodeError> {
        self.frame_stack.pop();
        Ok(())
    }

    fn read_field_begin(&mut self, buf: &mut Buffer) -> Result<FieldHeader, DecodeError> {
        let prefix = peek_copy(buf, 1)?;
        let byte = prefix[0];
        if byte == 0 {
            take(buf, 1)?;
            return Ok(FieldHeader { id: 0, field_type: FieldType::Stop });
        }
        let delta = (byte & 0xf0) >> 4;
        let compact_type_code = byte & 0x0f;
        let field_type = canonical_type(compact_type_code)?;
        self.pending_bool = match compact_type_code {
            TYPE_BOOLEAN_TRUE => Some(true),
            TYPE_BOOLEAN_FALSE => Some(false),
            _ => None,
        };

        if delta == 0 {
            // Long form: header byte, then a zigzag varint absolute id.
            // Peek both before draining either so an id that straddles the
            // end of the buffered data leaves everything untouched.
            let (raw, total) = peek_varint_after(buf, 1)?;
            take(buf, total)?;
            let new_id = zigzag_decode_32(raw as u32) as i16;
            self.set_last_field_id(new_id);
            return Ok(FieldHeader { id: new_id, field_type });
        }

        let new_id = self.last_field_id() + (delta as i16);
        take(buf, 1)?;
        self.set_last_field_id(new_id);
        Ok(FieldHeader { id: new_id, field_type })
    }

    fn read_message_end(&mut self, _buf: &mut Buffer) -> Result<(), DecodeError> {
        Ok(())
    }

    fn read_bool(&mut self, buf: &mut Buffer) -> Result<bool, DecodeError> {
        if let Some(v) = self.pending_bool.take() {
            return Ok(v);
        }
        let b = take(buf, 1)?;
        Ok(b[0] != 0)
    }

    fn read_byte(&mut self, buf: &mut Buffer) -> Result<i8, DecodeError> {
        Ok(take(buf, 1)?[0] as i8)
    }

    fn read_i16(&mut self, buf: &mut Buffer) -> Result<i16, DecodeError> {
        Ok(zigzag_decode_32(read_varint_u64(buf)? as u32) as i16)
    }

    fn read_i32(&mut self, buf: &mut Buffer) -> Result<i32, DecodeError> {
        Ok(zigzag_decode_32(read_varint_u64(buf)? as u32))
    }

    fn read_i64(&mut self, buf: &mut Buffer) -> Result<i64, DecodeError> {
        Ok(zigzag_decode_64(read_varint_u64(buf)?))
    }

    fn read_double(&mut self, buf: &mut Buffer) -> Result<f64, DecodeError> {
        let b = take(buf, 8)?;
        let mut bits: u64 = 0;
        for i in 0..8 {
            bits |= (b[i] as u64) << (8 * i);
        }
        Ok(f64::from_bits(bits))
    }

    fn read_binary(&mut self, buf: &mut Buffer) -> Result<Vec<u8>, DecodeError> {
        let len = read_varint_u64(buf)? as usize;
        Ok(take(buf, len)?.to_vec())
    }

    fn read_map_begin(&mut self, buf: &mut Buffer) -> Result<MapHeader, DecodeError> {
        let size = read_varint_u64(buf)? as i32;
        if size == 0 {
            return Ok(MapHeader { key_type: FieldType::Stop, value_type: FieldType::Stop, size: 0 });
        }
        let types = peek_copy(buf, 1)?;
        take(buf, 1)?;
        let key_type = canonical_type((types[0] & 0xf0) >> 4)?;
        let value_type = canonical_type(types[0] & 0x0f)?;
        Ok(MapHeader { key_type, value_type, size })
    }

    fn read_list_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader, DecodeError> {
        let prefix = peek_copy(buf, 1)?;
        let size_nibble = (prefix[0] & 0xf0) >> 4;
        let compact_elem = prefix[0] & 0x0f;
        let element_type = canonical_type(compact_elem)?;
        if size_nibble == 0x0f {
            take(buf, 1)?;
            let size = read_varint_u64(buf)? as i32;
            Ok(ListHeader { element_type, size })
        } else {
            take(buf, 1)?;
            Ok(ListHeader { element_type, size: size_nibble as i32 })
        }
    }

    fn read_set_begin(&mut self, buf: &mut Buffer) -> Result<ListHeader, DecodeError> {
        self.read_list_begin(buf)
    }

    fn write_message_begin(&mut self, buf: &mut Buffer, name: &str, message_type: MessageType, seq_id: i32) {
        let mut out = vec![PROTOCOL_ID, VERSION | ((message_type as u8) << TYPE_SHIFT)];
        write_varint_u64(&mut out, zigzag_encode_32(seq_id) as u64);
        write_varint_u64(&mut out, name.len() as u64);
        out.extend_from_slice(name.as_bytes());
        buf.append(&out);
    }

    fn write_struct_begin(&mut self, _buf: &mut Buffer) {
        self.frame_stack.push(0);
    }

    fn write_field_begin(&mut self, buf: &mut Buffer, field: FieldHeader) {
        // A bool field's header byte carries the value itself, which isn't
        // known yet; hold the id/delta and let write_bool emit the byte.
        if field.field_type == FieldType::Bool {
            self.pending_write_field = Some(field);
            return;
        }
        self.write_field_header(buf, field.id, compact_type(field.field_type));
    }

    fn write_field_stop(&mut self, buf: &mut Buffer) {
        buf.append(&[0]);
    }

    fn write_struct_end(&mut self, _buf: &mut Buffer) {
        self.frame_stack.pop();
    }

    fn write_message_end(&mut self, _buf: &mut Buffer) {}

    fn write_bool(&mut self, buf: &mut Buffer, v: bool) {
        if let Some(field) = self.pending_write_field.take() {
            let code = if v { TYPE_BOOLEAN_TRUE } else { TYPE_BOOLEAN_FALSE };
            self.write_field_header(buf, field.id, code);
            return;
        }
        // Not a deferred struct field (e.g. a list/set element): the
        // element-type nibble was already written by write_list_begin, so
        // the value itself still needs its own byte on the wire.
        buf.append(&[if v { 1 } else { 0 }]);
    }

    fn write_byte(&mut self, buf: &mut Buffer, v: i8) {
        buf.append(&[v as u8]);
    }

    fn write_i16(&mut self, buf: &mut Buffer, v: i16) {
        let mut out = Vec::new();
        write_varint_u64(&mut out, zigzag_encode_32(v as i32) as u64);
        buf.append(&out);
    }

    fn write_i32(&mut self, buf: &mut Buffer, v: i32) {
        let mut out = Vec::new();
        write_varint_u64(&mut out, zigzag_encode_32(v) as u64);
        buf.append(&out);
    }

    fn write_i64(&mut self, buf: &mut Buffer, v: i64) {
        let mut out = Vec::new();
        write_varint_u64(&mut out, zigzag_encode_64(v));
        buf.append(&out);
    }

    fn write_double(&mut self, buf: &mut Buffer, v: f64) {
        let bits = v.to_bits();
        let mut out = [0u8; 8];
        for i in 0..8 {
            out[i] = (bits >> (8 * i)) as u8;
        }
        buf.append(&out);
    }

    fn write_binary(&mut self, buf: &mut Buffer, v: &[u8]) -> Result<(), DecodeError> {
        if v.len() > i32::max_value() as usize {
            return Err(DecodeError::Malformed("binary payload exceeds i32::MAX".to_string()));
        }
        let mut out = Vec::new();
        write_varint_u64(&mut out, v.len() as u64);
        buf.append(&out);
        buf.append(v);
        Ok(())
    }

    fn write_map_begin(&mut self, buf: &mut Buffer, header: MapHeader) -> Result<(), DecodeError> {
        if header.size < 0 {
            return Err(DecodeError::Malformed(format!("negative map size {}", header.size)));
        }
        let mut out = Vec::new();
        write_varint_u64(&mut out, header.size as u64);
        buf.append(&out);
        if header.size > 0 {
            buf.append(&[(compact_type(header.key_type) << 4) | compact_type(header.value_type)]);
        }
        Ok(())
    }

    fn write_list_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<(), DecodeError> {
        if header.size < 0 {
            return Err(DecodeError::Malformed(format!("negative collection size {}", header.size)));
        }
        let compact_elem = compact_type(header.element_type);
        if header.size < 15 {
            buf.append(&[((header.size as u8) << 4) | compact_elem]);
        } else {
            buf.append(&[0xf0 | compact_elem]);
            let mut out = Vec::new();
            write_varint_u64(&mut out, header.size as u64);
            buf.append(&out);
        }
        Ok(())
    }

    fn write_set_begin(&mut self, buf: &mut Buffer, header: ListHeader) -> Result<(), DecodeError> {
        self.write_list_begin(buf, header)
    }
}

impl CompactProtocol {
    fn set_last_field_id(&mut self, id: i16) {
        if let Some(top) = self.frame_stack.last_mut() {
            *top = id;
        } else {
            self.frame_stack.push(id);
        }
    }

    /// Short-form delta nibble when the id rose by 1-15 since the last
    /// field in this struct, else a type byte plus a zigzag absolute id.
    fn write_field_header(&mut self, buf: &mut Buffer, id: i16, compact_type_code: u8) {
        let delta = id - self.last_field_id();
        if delta > 0 && delta <= 15 {
            buf.append(&[((delta as u8) << 4) | compact_type_code]);
        } else {
            buf.append(&[compact_type_code]);
            let mut out = Vec::new();
            write_varint_u64(&mut out, zigzag_encode_32(id as i32) as u64);
            buf.append(&out);
        }
        self.set_last_field_id(id);
    }
}

/// Like [`read_varint_u64`], but the varint starts `skip` bytes into the
/// buffer rather than at the front, and nothing is drained — the caller
/// gets back the decoded value and the total byte count (`skip` plus the
/// varint's own length) to drain once it's ready to commit.
fn peek_varint_after(buf: &mut Buffer, skip: usize) -> Result<(u64, usize), DecodeError> {
    let avail = buf.len();
    if avail <= skip {
        return Err(DecodeError::NeedMore);
    }
    let window = avail.min(skip + 10);
    let bytes = peek_copy(buf, window)?;
    let mut value: u64 = 0;
    for i in 0..(window - skip) {
        let byte = bytes[skip + i];
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, skip + i + 1));
        }
    }
    if window - skip >= 10 {
        return Err(DecodeError::Malformed("varint longer than 10 bytes".to_string()));
    }
    Err(DecodeError::NeedMore)
}

#[cfg(test)]
mod tests {
    use super::CompactProtocol;
    use buffer::Buffer;
    use thrift::{DecodeError, FieldHeader, FieldType, MessageType, Protocol};

    #[test]
    fn message_round_trip() {
        let mut p = CompactProtocol::new();
        let mut buf = Buffer::new();
        p.write_message_begin(&mut buf, "ping", MessageType::Call, 9);
        let header = p.read_message_begin(&mut buf).unwrap();
        assert_eq!(header.name, "ping");
        assert_eq!(header.seq_id, 9);
        assert_eq!(header.message_type, MessageType::Call);
    }

    #[test]
    fn field_ids_use_delta_encoding_within_a_struct() {
        let mut p = CompactProtocol::new();
        let mut buf = Buffer::new();
        p.write_struct_begin(&mut buf);
        p.write_field_begin(&mut buf, FieldHeader { id: 1, field_type: FieldType::I32 });
        p.write_i32(&mut buf, 10);
        p.write_field_begin(&mut buf, FieldHeader { id: 3, field_type: FieldType::I32 });
        p.write_i32(&mut buf, 20);
        p.write_field_stop(&mut buf);
        p.write_struct_end(&mut buf);

        let mut reader = CompactProtocol::new();
        reader.read_struct_begin(&mut buf).unwrap();
        let f1 = reader.read_field_begin(&mut buf).unwrap();
        assert_eq!(f1.id, 1);
        assert_eq!(reader.read_i32(&mut buf).unwrap(), 10);
        let f2 = reader.read_field_begin(&mut buf).unwrap();
        assert_eq!(f2.id, 3);
        assert_eq!(reader.read_i32(&mut buf).unwrap(), 20);
        let stop = reader.read_field_begin(&mut buf).unwrap();
        assert_eq!(stop.field_type, FieldType::Stop);
        reader.read_struct_end(&mut buf).unwrap();
    }

    #[test]
    fn bool_value_is_embedded_in_field_header() {
        let mut p = CompactProtocol::new();
        let mut buf = Buffer::new();
        p.write_struct_begin(&mut buf);
        p.write_field_begin(&mut buf, FieldHeader { id: 1, field_type: FieldType::Bool });
        p.write_bool(&mut buf, true);
        p.write_field_stop(&mut buf);

        // field-header byte (embedding the value) + stop byte: no separate bool byte.
        assert_eq!(buf.len(), 2);

        let mut reader = CompactProtocol::new();
        reader.read_struct_begin(&mut buf).unwrap();
        let field = reader.read_field_begin(&mut buf).unwrap();
        assert_eq!(reader.read_bool(&mut buf).unwrap(), true);
        assert_eq!(field.id, 1);
    }

    #[test]
    fn incomplete_varint_does_not_consume() {
        let mut p = CompactProtocol::new();
        let mut buf = Buffer::new();
        buf.append(&[0x80]);
        match p.read_i32(&mut buf) {
            Err(DecodeError::NeedMore) => {}
            other => panic!("expected NeedMore, got {:?}", other),
        }
        assert_eq!(buf.len(), 1);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gob encoding for the handler wire protocol.
//!
//! Handler processes speak Go's `net/rpc`, whose default codec is
//! `encoding/gob`. A gob stream is a sequence of messages:
//! - unsigned integer: length of the rest of the message
//! - signed integer: type id (negative means a type definition follows)
//! - the encoded type definition (a `wireType`) or value
//!
//! Integers use gob's variable-length encoding: values below 128 take one
//! byte, larger values are written as the negated byte count followed by the
//! big-endian bytes. Signed integers are zig-zag folded first.
//!
//! [`Encoder`] produces the subset the protocol needs (structs, slices and
//! scalar builtins). [`Decoder`] accepts every wire kind a Go peer may send
//! except interfaces and yields a dynamic [`Value`] tree.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum message size (64 MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// First type id handed out to user types. Lower ids belong to gob's
/// bootstrap types.
pub const FIRST_USER_TYPE_ID: i64 = 65;

/// Maximum nesting of values accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// Predefined gob type ids.
pub mod type_id {
    pub const BOOL: i64 = 1;
    pub const INT: i64 = 2;
    pub const UINT: i64 = 3;
    pub const FLOAT: i64 = 4;
    pub const BYTES: i64 = 5;
    pub const STRING: i64 = 6;
    pub const COMPLEX: i64 = 7;
    pub const INTERFACE: i64 = 8;
}

/// Errors that can occur during gob encoding/decoding
#[derive(Debug, Error)]
pub enum GobError {
    #[error("message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(u64),

    #[error("truncated message")]
    Truncated,

    #[error("invalid unsigned integer encoding")]
    InvalidUint,

    #[error("unknown type id: {0}")]
    UnknownType(i64),

    #[error("field {field} out of range for type {type_name}")]
    FieldOutOfRange { type_name: String, field: i64 },

    #[error("malformed type definition: {0}")]
    MalformedType(String),

    #[error("malformed value: {0}")]
    MalformedValue(String),

    #[error("unsupported gob value: {0}")]
    Unsupported(&'static str),

    #[error("values nested deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("expected {expected} for {field}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Static description of a type the encoder can send.
#[derive(Debug, Clone, PartialEq)]
pub enum GobType {
    Bool,
    Int,
    Uint,
    Float,
    Bytes,
    String,
    Struct(Arc<StructType>),
    Slice(Arc<SliceType>),
}

/// A named struct with ordered, exported fields.
#[derive(Debug, PartialEq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, GobType)>,
}

/// A named slice type.
#[derive(Debug, PartialEq)]
pub struct SliceType {
    pub name: String,
    pub elem: GobType,
}

impl GobType {
    /// Describe a struct type. Field order defines the wire field numbers.
    pub fn structure<'a>(
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, GobType)>,
    ) -> Self {
        GobType::Struct(Arc::new(StructType {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        }))
    }

    /// Describe a slice type.
    pub fn slice(name: impl Into<String>, elem: GobType) -> Self {
        GobType::Slice(Arc::new(SliceType {
            name: name.into(),
            elem,
        }))
    }

    fn builtin_id(&self) -> Option<i64> {
        match self {
            GobType::Bool => Some(type_id::BOOL),
            GobType::Int => Some(type_id::INT),
            GobType::Uint => Some(type_id::UINT),
            GobType::Float => Some(type_id::FLOAT),
            GobType::Bytes => Some(type_id::BYTES),
            GobType::String => Some(type_id::STRING),
            GobType::Struct(_) | GobType::Slice(_) => None,
        }
    }

    /// Type name as sent in type definitions.
    pub fn name(&self) -> &str {
        match self {
            GobType::Bool => "bool",
            GobType::Int => "int",
            GobType::Uint => "uint",
            GobType::Float => "float",
            GobType::Bytes => "bytes",
            GobType::String => "string",
            GobType::Struct(st) => &st.name,
            GobType::Slice(sl) => &sl.name,
        }
    }
}

/// A decoded (or to-be-encoded) gob value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Complex(f64, f64),
    Bytes(Bytes),
    String(String),
    /// Struct fields present on the wire, by name. Absent fields are zero.
    Struct(Vec<(String, Value)>),
    /// Slice or array elements.
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Payload of a type with a custom Go marshaler.
    Opaque(Bytes),
}

impl Value {
    /// Look up a struct field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Whether gob would omit this value when it is a struct field.
    fn is_zero(&self) -> bool {
        match self {
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Uint(u) => *u == 0,
            Value::Float(f) => *f == 0.0,
            Value::Complex(re, im) => *re == 0.0 && *im == 0.0,
            Value::Bytes(b) | Value::Opaque(b) => b.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Seq(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Struct(_) => false,
        }
    }

    /// Fail unless this value is a struct. `what` names the expected message.
    pub fn expect_struct(&self, what: &str) -> Result<(), GobError> {
        match self {
            Value::Struct(_) => Ok(()),
            _ => Err(GobError::TypeMismatch {
                field: what.to_string(),
                expected: "struct",
            }),
        }
    }

    pub fn str_field(&self, name: &str) -> Result<String, GobError> {
        match self.field(name) {
            None => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(mismatch(name, "string")),
        }
    }

    pub fn bytes_field(&self, name: &str) -> Result<Bytes, GobError> {
        match self.field(name) {
            None => Ok(Bytes::new()),
            Some(Value::Bytes(b)) => Ok(b.clone()),
            Some(_) => Err(mismatch(name, "bytes")),
        }
    }

    pub fn int_field(&self, name: &str) -> Result<i64, GobError> {
        match self.field(name) {
            None => Ok(0),
            Some(Value::Int(i)) => Ok(*i),
            Some(_) => Err(mismatch(name, "int")),
        }
    }

    pub fn uint_field(&self, name: &str) -> Result<u64, GobError> {
        match self.field(name) {
            None => Ok(0),
            Some(Value::Uint(u)) => Ok(*u),
            Some(_) => Err(mismatch(name, "uint")),
        }
    }

    pub fn bool_field(&self, name: &str) -> Result<bool, GobError> {
        match self.field(name) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(mismatch(name, "bool")),
        }
    }

    pub fn seq_field(&self, name: &str) -> Result<&[Value], GobError> {
        match self.field(name) {
            None => Ok(&[]),
            Some(Value::Seq(items)) => Ok(items),
            Some(_) => Err(mismatch(name, "slice")),
        }
    }
}

fn mismatch(field: &str, expected: &'static str) -> GobError {
    GobError::TypeMismatch {
        field: field.to_string(),
        expected,
    }
}

/// A message type that maps onto a Go struct on the other end of the wire.
pub trait GobMessage: Sized {
    /// The wire description of this message.
    fn gob_type() -> GobType;

    /// Convert into a value matching [`GobMessage::gob_type`].
    fn to_value(&self) -> Value;

    /// Build from a decoded value. Missing fields take their zero value.
    fn from_value(value: Value) -> Result<Self, GobError>;
}

// ============================================================================
// Primitive encoding
// ============================================================================

/// Write an unsigned integer.
pub fn put_uint(buf: &mut BytesMut, x: u64) {
    if x < 0x80 {
        buf.put_u8(x as u8);
        return;
    }
    let bytes = x.to_be_bytes();
    let skip = (x.leading_zeros() / 8) as usize;
    let n = bytes.len() - skip;
    buf.put_u8((0x100 - n) as u8);
    buf.put_slice(&bytes[skip..]);
}

/// Write a signed integer.
pub fn put_int(buf: &mut BytesMut, i: i64) {
    let folded = if i < 0 {
        (!(i as u64) << 1) | 1
    } else {
        (i as u64) << 1
    };
    put_uint(buf, folded);
}

fn put_float(buf: &mut BytesMut, f: f64) {
    put_uint(buf, f.to_bits().swap_bytes());
}

fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    put_uint(buf, b.len() as u64);
    buf.put_slice(b);
}

fn put_message(out: &mut BytesMut, body: &[u8]) {
    put_uint(out, body.len() as u64);
    out.put_slice(body);
}

/// Read an unsigned integer.
pub fn get_uint(buf: &mut Bytes) -> Result<u64, GobError> {
    if !buf.has_remaining() {
        return Err(GobError::Truncated);
    }
    let first = buf.get_u8();
    if first < 0x80 {
        return Ok(first as u64);
    }
    let n = 0x100 - first as usize;
    if n > 8 {
        return Err(GobError::InvalidUint);
    }
    if buf.remaining() < n {
        return Err(GobError::Truncated);
    }
    Ok(buf.get_uint(n))
}

/// Read a signed integer.
pub fn get_int(buf: &mut Bytes) -> Result<i64, GobError> {
    let folded = get_uint(buf)?;
    if folded & 1 == 1 {
        Ok(!(folded >> 1) as i64)
    } else {
        Ok((folded >> 1) as i64)
    }
}

fn get_float(buf: &mut Bytes) -> Result<f64, GobError> {
    Ok(f64::from_bits(get_uint(buf)?.swap_bytes()))
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, GobError> {
    let len = get_uint(buf)?;
    if len > buf.remaining() as u64 {
        return Err(GobError::Truncated);
    }
    Ok(buf.split_to(len as usize))
}

fn get_string(buf: &mut Bytes) -> Result<String, GobError> {
    let raw = get_bytes(buf)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Split the next complete message off an in-memory stream.
pub fn take_message(buf: &mut Bytes) -> Result<Bytes, GobError> {
    let len = get_uint(buf)?;
    if len > MAX_MESSAGE_SIZE as u64 {
        return Err(GobError::MessageTooLarge(len));
    }
    if len > buf.remaining() as u64 {
        return Err(GobError::Truncated);
    }
    Ok(buf.split_to(len as usize))
}

/// Read the next complete message from an async reader.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, GobError> {
    let first = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(GobError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    };

    let len = if first < 0x80 {
        first as u64
    } else {
        let n = 0x100 - first as usize;
        if n > 8 {
            return Err(GobError::InvalidUint);
        }
        let mut be = [0u8; 8];
        reader.read_exact(&mut be[8 - n..]).await?;
        u64::from_be_bytes(be)
    };

    if len > MAX_MESSAGE_SIZE as u64 {
        return Err(GobError::MessageTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Bytes::from(payload))
}

// ============================================================================
// Encoder
// ============================================================================

/// Stateful gob encoder. Type definitions are sent once per encoder, so one
/// encoder must be used per connection.
#[derive(Debug)]
pub struct Encoder {
    sent: HashMap<String, i64>,
    next_id: i64,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            sent: HashMap::new(),
            next_id: FIRST_USER_TYPE_ID,
        }
    }

    /// Append a message (preceded by any type definitions it still needs).
    pub fn encode_message<M: GobMessage>(
        &mut self,
        msg: &M,
        out: &mut BytesMut,
    ) -> Result<(), GobError> {
        self.encode(&M::gob_type(), &msg.to_value(), out)
    }

    /// Append `value` as a top-level value of type `ty`.
    pub fn encode(
        &mut self,
        ty: &GobType,
        value: &Value,
        out: &mut BytesMut,
    ) -> Result<(), GobError> {
        let id = self.send_type(ty, out);

        let mut body = BytesMut::new();
        put_int(&mut body, id);
        if !matches!(ty, GobType::Struct(_)) {
            // Non-struct values travel as the single field of an implicit struct.
            put_uint(&mut body, 0);
        }
        encode_value(ty, value, &mut body)?;

        if body.len() > MAX_MESSAGE_SIZE {
            return Err(GobError::MessageTooLarge(body.len() as u64));
        }
        put_message(out, &body);
        Ok(())
    }

    /// Emit type definitions for `ty` and everything it references. Returns its id.
    fn send_type(&mut self, ty: &GobType, out: &mut BytesMut) -> i64 {
        if let Some(id) = ty.builtin_id() {
            return id;
        }
        if let Some(&id) = self.sent.get(ty.name()) {
            return id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.sent.insert(ty.name().to_string(), id);

        let mut def = BytesMut::new();
        match ty {
            GobType::Struct(st) => {
                let field_ids: Vec<i64> = st
                    .fields
                    .iter()
                    .map(|(_, field_ty)| self.send_type(field_ty, out))
                    .collect();

                // wireType.StructT is field 2
                put_uint(&mut def, 3);
                // structType.CommonType
                put_uint(&mut def, 1);
                put_common_type(&mut def, &st.name, id);
                if !st.fields.is_empty() {
                    // structType.Field
                    put_uint(&mut def, 1);
                    put_uint(&mut def, st.fields.len() as u64);
                    for ((name, _), field_id) in st.fields.iter().zip(field_ids) {
                        put_uint(&mut def, 1);
                        put_bytes(&mut def, name.as_bytes());
                        put_uint(&mut def, 1);
                        put_int(&mut def, field_id);
                        put_uint(&mut def, 0);
                    }
                }
                put_uint(&mut def, 0);
                put_uint(&mut def, 0);
            }
            GobType::Slice(sl) => {
                let elem_id = self.send_type(&sl.elem, out);

                // wireType.SliceT is field 1
                put_uint(&mut def, 2);
                put_uint(&mut def, 1);
                put_common_type(&mut def, &sl.name, id);
                put_uint(&mut def, 1);
                put_int(&mut def, elem_id);
                put_uint(&mut def, 0);
                put_uint(&mut def, 0);
            }
            _ => unreachable!("builtin types have fixed ids"),
        }

        let mut msg = BytesMut::with_capacity(def.len() + 4);
        put_int(&mut msg, -id);
        msg.put(def);
        put_message(out, &msg);
        id
    }
}

fn put_common_type(buf: &mut BytesMut, name: &str, id: i64) {
    put_uint(buf, 1);
    put_bytes(buf, name.as_bytes());
    put_uint(buf, 1);
    put_int(buf, id);
    put_uint(buf, 0);
}

fn encode_value(ty: &GobType, value: &Value, buf: &mut BytesMut) -> Result<(), GobError> {
    match (ty, value) {
        (GobType::Bool, Value::Bool(b)) => put_uint(buf, *b as u64),
        (GobType::Int, Value::Int(i)) => put_int(buf, *i),
        (GobType::Uint, Value::Uint(u)) => put_uint(buf, *u),
        (GobType::Float, Value::Float(f)) => put_float(buf, *f),
        (GobType::Bytes, Value::Bytes(b)) => put_bytes(buf, b),
        (GobType::String, Value::String(s)) => put_bytes(buf, s.as_bytes()),
        (GobType::Struct(st), Value::Struct(_)) => {
            let mut last: i64 = -1;
            for (index, (name, field_ty)) in st.fields.iter().enumerate() {
                let Some(field_value) = value.field(name) else {
                    continue;
                };
                // Nested structs are always sent, zero scalars never.
                if field_value.is_zero() {
                    continue;
                }
                let index = index as i64;
                put_uint(buf, (index - last) as u64);
                encode_value(field_ty, field_value, buf)?;
                last = index;
            }
            put_uint(buf, 0);
        }
        (GobType::Slice(sl), Value::Seq(items)) => {
            put_uint(buf, items.len() as u64);
            for item in items {
                encode_value(&sl.elem, item, buf)?;
            }
        }
        _ => {
            return Err(GobError::TypeMismatch {
                field: ty.name().to_string(),
                expected: "value matching its declared type",
            });
        }
    }
    Ok(())
}

// ============================================================================
// Decoder
// ============================================================================

/// Type definition received from the peer.
#[derive(Debug, Clone, PartialEq)]
enum WireType {
    Struct {
        name: String,
        fields: Vec<(String, i64)>,
    },
    Slice {
        elem: i64,
    },
    Array {
        elem: i64,
    },
    Map {
        key: i64,
        elem: i64,
    },
    Opaque,
}

/// Stateful gob decoder. Remembers the peer's type definitions, so one
/// decoder must be used per connection.
#[derive(Debug, Default)]
pub struct Decoder {
    types: HashMap<i64, WireType>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read messages until the next value arrives and return it.
    pub async fn decode<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<Value, GobError> {
        loop {
            let message = read_message(reader).await?;
            if let Some(value) = self.decode_message(message)? {
                return Ok(value);
            }
        }
    }

    /// Read the next value and convert it into a message.
    pub async fn read<M: GobMessage, R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<M, GobError> {
        M::from_value(self.decode(reader).await?)
    }

    /// Decode the next value from an in-memory stream.
    pub fn decode_from_bytes(&mut self, buf: &mut Bytes) -> Result<Value, GobError> {
        loop {
            let message = take_message(buf)?;
            if let Some(value) = self.decode_message(message)? {
                return Ok(value);
            }
        }
    }

    /// Process one message. Returns `None` when it carried a type definition.
    pub fn decode_message(&mut self, mut message: Bytes) -> Result<Option<Value>, GobError> {
        let id = get_int(&mut message)?;
        if id < 0 {
            let wire = parse_wire_type(&mut message)?;
            self.types.insert(-id, wire);
            return Ok(None);
        }

        if !matches!(self.types.get(&id), Some(WireType::Struct { .. })) {
            let delta = get_uint(&mut message)?;
            if delta != 0 {
                return Err(GobError::MalformedValue(format!(
                    "non-struct value with field delta {delta}"
                )));
            }
        }
        let value = self.decode_value(id, &mut message, 0)?;
        Ok(Some(value))
    }

    fn decode_value(&self, id: i64, buf: &mut Bytes, depth: usize) -> Result<Value, GobError> {
        if depth > MAX_DEPTH {
            return Err(GobError::TooDeep);
        }

        match id {
            type_id::BOOL => return Ok(Value::Bool(get_uint(buf)? != 0)),
            type_id::INT => return Ok(Value::Int(get_int(buf)?)),
            type_id::UINT => return Ok(Value::Uint(get_uint(buf)?)),
            type_id::FLOAT => return Ok(Value::Float(get_float(buf)?)),
            type_id::BYTES => return Ok(Value::Bytes(get_bytes(buf)?)),
            type_id::STRING => return Ok(Value::String(get_string(buf)?)),
            type_id::COMPLEX => {
                let re = get_float(buf)?;
                let im = get_float(buf)?;
                return Ok(Value::Complex(re, im));
            }
            type_id::INTERFACE => return Err(GobError::Unsupported("interface")),
            _ => {}
        }

        match self.types.get(&id).ok_or(GobError::UnknownType(id))? {
            WireType::Struct { name, fields } => {
                let mut field: i64 = -1;
                let mut values = Vec::new();
                loop {
                    let delta = get_uint(buf)?;
                    if delta == 0 {
                        break;
                    }
                    field = field.saturating_add(delta.min(i64::MAX as u64) as i64);
                    let (field_name, field_id) = usize::try_from(field)
                        .ok()
                        .and_then(|index| fields.get(index))
                        .ok_or_else(|| GobError::FieldOutOfRange {
                            type_name: name.clone(),
                            field,
                        })?;
                    let value = self.decode_value(*field_id, buf, depth + 1)?;
                    values.push((field_name.clone(), value));
                }
                Ok(Value::Struct(values))
            }
            WireType::Slice { elem } | WireType::Array { elem } => {
                let count = element_count(buf)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_value(*elem, buf, depth + 1)?);
                }
                Ok(Value::Seq(items))
            }
            WireType::Map { key, elem } => {
                let count = element_count(buf)?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let k = self.decode_value(*key, buf, depth + 1)?;
                    let v = self.decode_value(*elem, buf, depth + 1)?;
                    entries.push((k, v));
                }
                Ok(Value::Map(entries))
            }
            WireType::Opaque => Ok(Value::Opaque(get_bytes(buf)?)),
        }
    }
}

/// Every element takes at least one byte, which bounds preallocation.
fn element_count(buf: &mut Bytes) -> Result<usize, GobError> {
    let count = get_uint(buf)?;
    if count > buf.remaining() as u64 {
        return Err(GobError::Truncated);
    }
    Ok(count as usize)
}

/// Walk the delta-numbered fields of an encoded struct.
fn read_fields(
    buf: &mut Bytes,
    mut on_field: impl FnMut(i64, &mut Bytes) -> Result<(), GobError>,
) -> Result<(), GobError> {
    let mut field: i64 = -1;
    loop {
        let delta = get_uint(buf)?;
        if delta == 0 {
            return Ok(());
        }
        if delta > 16 {
            return Err(GobError::MalformedType(format!("field delta {delta}")));
        }
        field += delta as i64;
        on_field(field, buf)?;
    }
}

fn unexpected_field(kind: &str, field: i64) -> GobError {
    GobError::MalformedType(format!("unexpected field {field} in {kind}"))
}

fn parse_common_type(buf: &mut Bytes) -> Result<(String, i64), GobError> {
    let mut name = String::new();
    let mut id = 0;
    read_fields(buf, |field, buf| {
        match field {
            0 => name = get_string(buf)?,
            1 => id = get_int(buf)?,
            _ => return Err(unexpected_field("CommonType", field)),
        }
        Ok(())
    })?;
    Ok((name, id))
}

fn parse_wire_type(buf: &mut Bytes) -> Result<WireType, GobError> {
    let mut wire = None;
    read_fields(buf, |field, buf| {
        wire = Some(match field {
            0 => parse_array_type(buf)?,
            1 => parse_slice_type(buf)?,
            2 => parse_struct_type(buf)?,
            3 => parse_map_type(buf)?,
            // GobEncoder, BinaryMarshaler and TextMarshaler types
            4..=6 => {
                read_fields(buf, |field, buf| match field {
                    0 => parse_common_type(buf).map(|_| ()),
                    _ => Err(unexpected_field("gobEncoderType", field)),
                })?;
                WireType::Opaque
            }
            _ => return Err(unexpected_field("wireType", field)),
        });
        Ok(())
    })?;
    wire.ok_or_else(|| GobError::MalformedType("empty wireType".to_string()))
}

fn parse_array_type(buf: &mut Bytes) -> Result<WireType, GobError> {
    let mut elem = 0;
    read_fields(buf, |field, buf| {
        match field {
            0 => {
                parse_common_type(buf)?;
            }
            1 => elem = get_int(buf)?,
            2 => {
                get_int(buf)?;
            }
            _ => return Err(unexpected_field("arrayType", field)),
        }
        Ok(())
    })?;
    Ok(WireType::Array { elem })
}

fn parse_slice_type(buf: &mut Bytes) -> Result<WireType, GobError> {
    let mut elem = 0;
    read_fields(buf, |field, buf| {
        match field {
            0 => {
                parse_common_type(buf)?;
            }
            1 => elem = get_int(buf)?,
            _ => return Err(unexpected_field("sliceType", field)),
        }
        Ok(())
    })?;
    Ok(WireType::Slice { elem })
}

fn parse_map_type(buf: &mut Bytes) -> Result<WireType, GobError> {
    let mut key = 0;
    let mut elem = 0;
    read_fields(buf, |field, buf| {
        match field {
            0 => {
                parse_common_type(buf)?;
            }
            1 => key = get_int(buf)?,
            2 => elem = get_int(buf)?,
            _ => return Err(unexpected_field("mapType", field)),
        }
        Ok(())
    })?;
    Ok(WireType::Map { key, elem })
}

fn parse_struct_type(buf: &mut Bytes) -> Result<WireType, GobError> {
    let mut name = String::new();
    let mut fields = Vec::new();
    read_fields(buf, |field, buf| {
        match field {
            0 => name = parse_common_type(buf)?.0,
            1 => {
                let count = element_count(buf)?;
                for _ in 0..count {
                    let mut field_name = String::new();
                    let mut field_id = 0;
                    read_fields(buf, |field, buf| {
                        match field {
                            0 => field_name = get_string(buf)?,
                            1 => field_id = get_int(buf)?,
                            _ => return Err(unexpected_field("fieldType", field)),
                        }
                        Ok(())
                    })?;
                    fields.push((field_name, field_id));
                }
            }
            _ => return Err(unexpected_field("structType", field)),
        }
        Ok(())
    })?;
    Ok(WireType::Struct { name, fields })
}

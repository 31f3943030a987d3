//! # Querypack
//!
//! A small, bounded, self-describing codec for the bodies of bridge messages.
//!
//! ## Philosophy
//!
//! - **Opaque payloads**: The bridge only ever carries strings, booleans, call
//!   identifiers, and ordered lists of those. Nothing else has a tag.
//! - **TLV Architecture**: `[Tag][Length?][Value]`, so a reader can always skip
//!   an item it does not care about.
//! - **Bounded**: Encoders back-patch lengths from an explicit scope stack.
//!   Decoders are zero-copy, bounds-checked views with a nesting limit.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Strings**: `[Tag: 1b][Len: 4b][UTF-8: Len]`
//! - **Lists**: `[Tag: 1b][Len: 4b][Items: Len]`
//! - **Messages**: `[Tag: 1b][Len: 4b][Name: String][Body: 1 item]`
//!
//! All integers are Little-Endian.

use std::fmt;


/// Maximum list nesting accepted by [`Encoder::value`] and [`Decoder::value`].
pub const MAX_DEPTH: usize = 32;

/// Querypack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`, or is not the tag the reader asked for.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// String or list length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Closing a scope that is not open.
    ScopeUnderflow,
    /// Attempted to finalize the buffer with open scopes.
    ScopeStillOpen,
    /// A message scope must hold exactly one body item.
    BadMessageBody(usize),
    /// Bytes were left over after the top-level item.
    TrailingBytes(usize),
    /// Lists nested deeper than [`MAX_DEPTH`].
    DepthExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "Invalid Tag byte: {:#04x}", b),
            Error::BlobTooLarge(n) => write!(f, "Blob of {} bytes exceeds u32 length", n),
            Error::BadMessageBody(n) => write!(f, "Message body must be exactly 1 item, found {}", n),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after item", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Querypack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    U64 = 0x06,
    String = 0x10,
    List = 0x20,
    Message = 0x33,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::BoolTrue),
            0x02 => Some(Tag::BoolFalse),
            0x06 => Some(Tag::U64),
            0x10 => Some(Tag::String),
            0x20 => Some(Tag::List),
            0x33 => Some(Tag::Message),
            _ => None,
        }
    }
}

/// A decoded, owned message body.
///
/// This is the whole type universe of the bridge: there is deliberately no
/// float, map, or null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U64(u64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Builds a list value from anything that yields values.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    /// Short type name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U64(_) => "u64",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Value::Bool(b) => Some(*b), _ => None }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self { Value::U64(n) => Some(*n), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self { Value::List(items) => Some(items), _ => None }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self { Value::U64(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::List(v) }
}

/// A named message as it crosses the transport: `(name, body)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub name: String,
    pub body: Value,
}

impl Message {
    pub fn new(name: impl Into<String>, body: Value) -> Self {
        Self { name: name.into(), body }
    }

    /// Encodes this message into a fresh byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.message_begin(&self.name)?;
        enc.value(&self.body)?;
        enc.message_end()?;
        enc.into_bytes()
    }

    /// Decodes exactly one message from `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let (name, mut body) = dec.message()?;
        let value = body.value()?;
        body.finish()?;
        dec.finish()?;
        Ok(Self { name: name.to_string(), body: value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    List,
    Message,
}

/// An open container on the `Encoder` stack.
struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// A bounded encoder with explicit scope tracking.
///
/// Containers reserve a 4-byte length on `*_begin` and back-patch it on
/// `*_end`. A message scope must contain exactly one body item.
pub struct Encoder {
    buf: Vec<u8>,
    stack: Vec<Frame>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: Vec::with_capacity(4),
        }
    }

    /// Consumes the encoder and returns the final byte vector.
    ///
    /// # Errors
    /// Returns `Error::ScopeStillOpen` if any container is still open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.stack.is_empty() {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn on_item_written(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.count += 1;
        }
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn begin_scope(&mut self, tag: Tag, scope: Scope) {
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0, 0, 0, 0]); // Length placeholder
        self.stack.push(Frame { start: self.buf.len(), scope, count: 0 });
    }

    fn end_scope(&mut self, expected: Scope) -> Result<()> {
        if self.stack.last().map(|frame| frame.scope) != Some(expected) {
            return Err(Error::ScopeUnderflow);
        }
        let frame = self.stack.pop().ok_or(Error::ScopeUnderflow)?;

        if frame.scope == Scope::Message && frame.count != 1 {
            return Err(Error::BadMessageBody(frame.count));
        }

        let body_len = self.buf.len() - frame.start;
        let len = u32::try_from(body_len).map_err(|_| Error::BlobTooLarge(body_len))?;
        self.buf[frame.start - 4..frame.start].copy_from_slice(&len.to_le_bytes());

        self.on_item_written();
        Ok(())
    }

    /// Encodes a boolean value.
    pub fn bool(&mut self, v: bool) -> Result<()> {
        let tag = if v { Tag::BoolTrue } else { Tag::BoolFalse };
        self.buf.push(tag as u8);
        self.on_item_written();
        Ok(())
    }

    /// Encodes an unsigned 64-bit integer (LE).
    pub fn u64(&mut self, v: u64) -> Result<()> {
        self.buf.push(Tag::U64 as u8);
        self.buf.extend_from_slice(&v.to_le_bytes());
        self.on_item_written();
        Ok(())
    }

    /// Encodes a UTF-8 string blob.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.buf.push(Tag::String as u8);
        self.write_len(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        self.on_item_written();
        Ok(())
    }

    /// Begins a List container. Must be closed via `list_end()`.
    pub fn list_begin(&mut self) -> Result<()> {
        self.begin_scope(Tag::List, Scope::List);
        Ok(())
    }

    pub fn list_end(&mut self) -> Result<()> { self.end_scope(Scope::List) }

    /// Begins a named Message. Exactly one body item must follow before `message_end()`.
    pub fn message_begin(&mut self, name: &str) -> Result<()> {
        self.begin_scope(Tag::Message, Scope::Message);
        self.str(name)?;
        // The name is metadata, not body.
        if let Some(frame) = self.stack.last_mut() {
            frame.count = 0;
        }
        Ok(())
    }

    pub fn message_end(&mut self) -> Result<()> { self.end_scope(Scope::Message) }

    /// Encodes an owned value tree.
    ///
    /// # Errors
    /// Returns `Error::DepthExceeded` for lists nested deeper than
    /// [`MAX_DEPTH`], the same trees [`Decoder::value`] rejects.
    pub fn value(&mut self, v: &Value) -> Result<()> {
        self.value_at(v, 0)
    }

    fn value_at(&mut self, v: &Value, depth: usize) -> Result<()> {
        match v {
            Value::Bool(b) => self.bool(*b),
            Value::U64(n) => self.u64(*n),
            Value::String(s) => self.str(s),
            Value::List(items) => {
                if depth >= MAX_DEPTH {
                    return Err(Error::DepthExceeded);
                }
                self.list_begin()?;
                for item in items {
                    self.value_at(item, depth + 1)?;
                }
                self.list_end()
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Container reads return new `Decoder`s restricted to the container body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails if any bytes are left in the view.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.read_array()?) as usize)
    }

    fn check_tag(&mut self, expected: Tag) -> Result<()> {
        let tag = self.peek_tag()?;
        if tag != expected {
            return Err(Error::InvalidTag(tag as u8));
        }
        self.read_bytes(1)?;
        Ok(())
    }

    fn enter_container(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.check_tag(expected)?;
        let len = self.read_len()?;
        Ok(Decoder::new(self.read_bytes(len)?))
    }

    /// Skips the next item and its nested children.
    pub fn skip(&mut self) -> Result<()> {
        match self.peek_tag()? {
            Tag::BoolTrue | Tag::BoolFalse => { self.read_bytes(1)?; }
            Tag::U64 => { self.read_bytes(9)?; }
            Tag::String | Tag::List | Tag::Message => {
                self.read_bytes(1)?;
                let len = self.read_len()?;
                self.read_bytes(len)?;
            }
        }
        Ok(())
    }

    /// Decodes a bool.
    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => { self.read_bytes(1)?; Ok(true) }
            Tag::BoolFalse => { self.read_bytes(1)?; Ok(false) }
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    /// Decodes u64 (LE).
    pub fn u64(&mut self) -> Result<u64> {
        self.check_tag(Tag::U64)?;
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Decodes a string slice (UTF-8).
    pub fn str(&mut self) -> Result<&'a str> {
        self.check_tag(Tag::String)?;
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a List into an iterator over item decoders.
    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter_container(Tag::List)? })
    }

    /// Decodes a Message header.
    ///
    /// Returns `(Name, BodyDecoder)`.
    pub fn message(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter_container(Tag::Message)?;
        let name = inner.str()?;
        Ok((name, inner))
    }

    /// Decodes the next item into an owned `Value`.
    pub fn value(&mut self) -> Result<Value> {
        self.value_at(0)
    }

    fn value_at(&mut self, depth: usize) -> Result<Value> {
        match self.peek_tag()? {
            Tag::BoolTrue | Tag::BoolFalse => Ok(Value::Bool(self.bool()?)),
            Tag::U64 => Ok(Value::U64(self.u64()?)),
            Tag::String => Ok(Value::String(self.str()?.to_string())),
            Tag::List => {
                if depth >= MAX_DEPTH {
                    return Err(Error::DepthExceeded);
                }
                let mut iter = self.list()?;
                let mut items = Vec::new();
                while let Some(mut item) = iter.next()? {
                    items.push(item.value_at(depth + 1)?);
                }
                Ok(Value::List(items))
            }
            Tag::Message => Err(Error::InvalidTag(Tag::Message as u8)),
        }
    }
}

/// Iterator for items within a List.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a Decoder for the next item, `None` at the end, or an error on a truncated item.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut probe = self.dec.clone();
        probe.skip()?;
        let len = self.dec.remaining() - probe.remaining();
        Ok(Some(Decoder::new(self.dec.read_bytes(len)?)))
    }
}

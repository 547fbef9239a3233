// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

//! Deterministisches Binärformat für alle konsensrelevanten Objekte.
//! Integers fester Breite little-endian, u64 als Varint, Vektoren und Strings längenpräfixiert.

use core::fmt;
use std::io::{Read, Write};

/// Obergrenze für Längenpräfixe beim Dekodieren (Schutz vor Riesen-Allokationen)
pub const MAX_DECODE_LEN: usize = 1 << 20;

#[derive(Debug)]
pub enum CodecError {
    Truncated,
    InvalidTag(u8),
    InvalidLength(usize),
    InvalidUtf8,
    TrailingBytes(usize),
    Io(std::io::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated input"),
            Self::InvalidTag(t) => write!(f, "invalid tag: {t}"),
            Self::InvalidLength(n) => write!(f, "invalid length: {n}"),
            Self::InvalidUtf8 => write!(f, "invalid utf-8 string"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after object"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}
impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Self::Truncated;
        }
        Self::Io(e)
    }
}

pub trait Encodable {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError>;
    fn encoded_len(&self) -> usize;
}

pub trait Decodable: Sized {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError>;
}

/// Kodiert ein Objekt in einen frischen Puffer
pub fn encode_to_vec<T: Encodable + ?Sized>(v: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(v.encoded_len());
    v.encode(&mut buf)?;
    Ok(buf)
}

/// Dekodiert genau ein Objekt; Restbytes sind ein Fehler (kanonische Form)
pub fn decode_exact<T: Decodable>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut s = bytes;
    let v = T::decode(&mut s)?;
    if !s.is_empty() {
        return Err(CodecError::TrailingBytes(s.len()));
    }
    Ok(v)
}

// Varint (u64) - little endian base-128
pub fn write_varu64<W: Write>(w: &mut W, mut v: u64) -> Result<(), CodecError> {
    let mut buf = [0u8; 10];
    let mut i = 0usize;
    while v >= 0x80 {
        if let Some(slot) = buf.get_mut(i) {
            *slot = (v as u8) | 0x80;
        } else {
            return Err(CodecError::InvalidLength(i));
        }
        v >>= 7;
        i += 1;
    }
    if let Some(slot) = buf.get_mut(i) {
        *slot = v as u8;
    } else {
        return Err(CodecError::InvalidLength(i));
    }
    i += 1;
    let to_write = buf.get(..i).ok_or(CodecError::InvalidLength(i))?;
    w.write_all(to_write).map_err(CodecError::Io)
}

pub fn read_varu64<R: Read>(r: &mut R) -> Result<u64, CodecError> {
    let mut x: u64 = 0;
    let mut s = 0u32;
    for _ in 0..10 {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        let [byte] = b;
        if (byte & 0x80) != 0 {
            x |= ((byte & 0x7f) as u64) << s;
            s += 7;
        } else {
            // nicht-kanonische Kodierung (abschließendes 0x00 nach Fortsetzung) ablehnen
            if byte == 0 && s > 0 {
                return Err(CodecError::InvalidLength(s as usize / 7));
            }
            x |= (byte as u64) << s;
            return Ok(x);
        }
    }
    Err(CodecError::InvalidLength(0))
}

#[inline]
pub fn varu64_len(mut v: u64) -> usize {
    let mut i = 1;
    while v >= 0x80 {
        v >>= 7;
        i += 1
    }
    i
}

fn read_len<R: Read>(r: &mut R) -> Result<usize, CodecError> {
    let len = read_varu64(r)?;
    let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength(usize::MAX))?;
    if len > MAX_DECODE_LEN {
        return Err(CodecError::InvalidLength(len));
    }
    Ok(len)
}

// Implementations for primitives
impl Encodable for u8 {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_all(&[*self]).map_err(CodecError::Io)
    }
    fn encoded_len(&self) -> usize {
        1
    }
}
impl Decodable for u8 {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        let [byte] = b;
        Ok(byte)
    }
}

impl Encodable for bool {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        (*self as u8).encode(w)
    }
    fn encoded_len(&self) -> usize {
        1
    }
}
impl Decodable for bool {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        match u8::decode(r)? {
            0 => Ok(false),
            1 => Ok(true),
            t => Err(CodecError::InvalidTag(t)),
        }
    }
}

// u64 immer als Varint (Höhen, Zähler, Beträge)
impl Encodable for u64 {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        write_varu64(w, *self)
    }
    fn encoded_len(&self) -> usize {
        varu64_len(*self)
    }
}
impl Decodable for u64 {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        read_varu64(r)
    }
}

// Feste Byte-Arrays (Hashes, Adressen, Schlüssel, Signaturen) ohne Längenpräfix
impl<const N: usize> Encodable for [u8; N] {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        w.write_all(self).map_err(CodecError::Io)
    }
    fn encoded_len(&self) -> usize {
        N
    }
}
impl<const N: usize> Decodable for [u8; N] {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let mut b = [0u8; N];
        r.read_exact(&mut b)?;
        Ok(b)
    }
}

impl Encodable for String {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        write_varu64(w, self.len() as u64)?;
        w.write_all(self.as_bytes()).map_err(CodecError::Io)
    }
    fn encoded_len(&self) -> usize {
        varu64_len(self.len() as u64) + self.len()
    }
}
impl Decodable for String {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let len = read_len(r)?;
        let mut raw = vec![0u8; len];
        r.read_exact(&mut raw)?;
        String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        write_varu64(w, self.len() as u64)?;
        for item in self {
            item.encode(w)?;
        }
        Ok(())
    }
    fn encoded_len(&self) -> usize {
        let i = varu64_len(self.len() as u64);
        self.iter().fold(i, |acc, it| acc + it.encoded_len())
    }
}
impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        let len = read_len(r)?;
        // Kapazität begrenzen: die Länge ist angreiferkontrolliert
        let mut v = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            v.push(T::decode(r)?);
        }
        Ok(v)
    }
}

//! Coders: byte encodings for values, timestamps and windows.
//!
//! State and elements cross process boundaries as bytes. A [`Coder`] must be deterministic:
//! equal values encode to equal bytes, so encoded keys can be compared directly by opaque
//! key-value stores.

use crate::error::{Error, Result};
use crate::pane::PaneInfo;
use crate::time::TimestampMs;
use crate::window::IntervalWindow;
use crate::windowed_value::WindowedValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Encodes and decodes values of type `T`.
pub trait Coder<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Serde-based coder using `postcard`'s compact varint format.
#[derive(Debug)]
pub struct PostcardCoder<T>(PhantomData<fn() -> T>);

impl<T> PostcardCoder<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for PostcardCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PostcardCoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Coder<T> for PostcardCoder<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Fixed 8-byte big-endian timestamps with the sign bit flipped, so byte order matches
/// timestamp order.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstantCoder;

impl InstantCoder {
    fn put(ts: TimestampMs, out: &mut Vec<u8>) {
        out.extend_from_slice(&((ts as u64) ^ (1 << 63)).to_be_bytes());
    }

    fn take(bytes: &[u8]) -> Result<(TimestampMs, &[u8])> {
        if bytes.len() < 8 {
            return Err(Error::Encoding(format!("instant needs 8 bytes, got {}", bytes.len())));
        }
        let (head, rest) = bytes.split_at(8);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(head);
        Ok(((u64::from_be_bytes(raw) ^ (1 << 63)) as i64, rest))
    }
}

impl Coder<TimestampMs> for InstantCoder {
    fn encode(&self, value: &TimestampMs) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8);
        Self::put(*value, &mut out);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<TimestampMs> {
        let (ts, rest) = Self::take(bytes)?;
        expect_consumed(rest)?;
        Ok(ts)
    }
}

/// Interval windows as the end instant followed by the duration as a varint.
///
/// Windows are usually short relative to epoch millis, so this is considerably smaller than
/// two fixed-width instants, and windows sharing an end sort together.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntervalWindowCoder;

impl Coder<IntervalWindow> for IntervalWindowCoder {
    fn encode(&self, value: &IntervalWindow) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(12);
        InstantCoder::put(value.end, &mut out);
        put_varint(value.duration() as u64, &mut out);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<IntervalWindow> {
        let (end, rest) = InstantCoder::take(bytes)?;
        let (duration, rest) = take_varint(rest)?;
        expect_consumed(rest)?;
        let start = i64::try_from(duration)
            .ok()
            .and_then(|d| end.checked_sub(d))
            .ok_or_else(|| Error::Encoding(format!("window duration {duration} underflows end {end}")))?;
        Ok(IntervalWindow::new(start, end))
    }
}

/// Full encoding of a [`WindowedValue`]: timestamp, windows, pane, then the value. Windows
/// and the value are length-prefixed so nested coders need not be self-delimiting.
pub struct WindowedValueCoder<T, W> {
    value_coder: Box<dyn Coder<T>>,
    window_coder: Box<dyn Coder<W>>,
}

impl<T, W> WindowedValueCoder<T, W> {
    pub fn new(value_coder: impl Coder<T> + 'static, window_coder: impl Coder<W> + 'static) -> Self {
        Self { value_coder: Box::new(value_coder), window_coder: Box::new(window_coder) }
    }
}

impl<T, W> Coder<WindowedValue<T, W>> for WindowedValueCoder<T, W> {
    fn encode(&self, value: &WindowedValue<T, W>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        InstantCoder::put(value.timestamp(), &mut out);
        put_varint(value.windows().len() as u64, &mut out);
        for w in value.windows() {
            put_prefixed(&self.window_coder.encode(w)?, &mut out);
        }
        put_prefixed(&postcard::to_allocvec(&value.pane())?, &mut out);
        put_prefixed(&self.value_coder.encode(value.value())?, &mut out);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<WindowedValue<T, W>> {
        let (timestamp, rest) = InstantCoder::take(bytes)?;
        let (count, mut rest) = take_varint(rest)?;
        let mut windows = Vec::new();
        for _ in 0..count {
            let (w, r) = take_prefixed(rest)?;
            windows.push(self.window_coder.decode(w)?);
            rest = r;
        }
        let (pane, rest) = take_prefixed(rest)?;
        let pane: PaneInfo = postcard::from_bytes(pane)?;
        let (value, rest) = take_prefixed(rest)?;
        expect_consumed(rest)?;
        Ok(WindowedValue::new(self.value_coder.decode(value)?, timestamp, windows, pane))
    }
}

fn put_varint(mut v: u64, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn take_varint(bytes: &[u8]) -> Result<(u64, &[u8])> {
    let mut v: u64 = 0;
    for (i, b) in bytes.iter().enumerate().take(10) {
        v |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((v, &bytes[i + 1..]));
        }
    }
    Err(Error::Encoding("truncated or overlong varint".into()))
}

fn put_prefixed(bytes: &[u8], out: &mut Vec<u8>) {
    put_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

fn take_prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = take_varint(bytes)?;
    let len = usize::try_from(len).map_err(|_| Error::Encoding(format!("length {len} too large")))?;
    if rest.len() < len {
        return Err(Error::Encoding(format!("expected {len} bytes, {} left", rest.len())));
    }
    Ok(rest.split_at(len))
}

fn expect_consumed(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::Encoding(format!("{} trailing bytes", rest.len())))
    }
}

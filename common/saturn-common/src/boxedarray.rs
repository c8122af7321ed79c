//! Heap-allocated fixed-length arrays whose `bincode::Decode` implementation writes straight into
//! the heap allocation.
//!
//! Decoding `Box<[T; LEN]>` through the derived implementation builds the array on the stack first,
//! which overflows the stack for VRAM-sized arrays.

use bincode::de::read::Reader;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::enc::write::Writer;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapArray<T, const LEN: usize>(Box<[T; LEN]>);

pub type BoxedByteArray<const LEN: usize> = HeapArray<u8, LEN>;
pub type BoxedWordArray<const LEN: usize> = HeapArray<u16, LEN>;

fn allocate<T: Copy + Default, const LEN: usize>() -> Box<[T; LEN]> {
    let Ok(array) = vec![T::default(); LEN].into_boxed_slice().try_into() else {
        unreachable!("boxed slice was allocated with exactly LEN elements")
    };
    array
}

impl<T: Copy + Default, const LEN: usize> HeapArray<T, LEN> {
    #[must_use]
    pub fn new() -> Self {
        Self(allocate())
    }

    /// Overwrite every element with the contents of `other` without reallocating.
    pub fn copy_from(&mut self, other: &Self) {
        self.0.copy_from_slice(other.0.as_ref());
    }
}

impl<T: Copy + Default, const LEN: usize> Default for HeapArray<T, LEN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const LEN: usize> From<Box<[T; LEN]>> for HeapArray<T, LEN> {
    fn from(value: Box<[T; LEN]>) -> Self {
        Self(value)
    }
}

impl<T, const LEN: usize> Deref for HeapArray<T, LEN> {
    type Target = [T; LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T, const LEN: usize> DerefMut for HeapArray<T, LEN> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Element types that can be serialized as a raw block of big-endian bytes.
pub trait RawElement: Copy + Default + 'static {
    const SIZE: usize;

    fn write_be(self, out: &mut [u8]);

    fn read_be(bytes: &[u8]) -> Self;
}

impl RawElement for u8 {
    const SIZE: usize = 1;

    fn write_be(self, out: &mut [u8]) {
        out[0] = self;
    }

    fn read_be(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl RawElement for u16 {
    const SIZE: usize = 2;

    fn write_be(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_be_bytes());
    }

    fn read_be(bytes: &[u8]) -> Self {
        u16::from_be_bytes([bytes[0], bytes[1]])
    }
}

// Elements are streamed through a small chunk buffer so that word arrays avoid per-element varints
const CHUNK_ELEMENTS: usize = 256;

impl<T: RawElement, const LEN: usize> Encode for HeapArray<T, LEN> {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let mut buffer = [0_u8; CHUNK_ELEMENTS * 2];
        for chunk in self.0.chunks(CHUNK_ELEMENTS) {
            let len = chunk.len() * T::SIZE;
            for (value, out) in chunk.iter().zip(buffer.chunks_exact_mut(T::SIZE)) {
                value.write_be(out);
            }
            encoder.writer().write(&buffer[..len])?;
        }
        Ok(())
    }
}

fn decode_into<T: RawElement, R: Reader, const LEN: usize>(
    reader: &mut R,
) -> Result<HeapArray<T, LEN>, DecodeError> {
    let mut array = HeapArray::<T, LEN>::new();
    let mut buffer = [0_u8; CHUNK_ELEMENTS * 2];
    for chunk in array.0.chunks_mut(CHUNK_ELEMENTS) {
        let len = chunk.len() * T::SIZE;
        reader.read(&mut buffer[..len])?;
        for (value, bytes) in chunk.iter_mut().zip(buffer.chunks_exact(T::SIZE)) {
            *value = T::read_be(bytes);
        }
    }
    Ok(array)
}

impl<T: RawElement, const LEN: usize, Context> Decode<Context> for HeapArray<T, LEN> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decoder.claim_bytes_read(LEN * T::SIZE)?;
        decode_into(decoder.reader())
    }
}

impl<'de, T: RawElement, const LEN: usize, Context> BorrowDecode<'de, Context>
    for HeapArray<T, LEN>
{
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        decoder.claim_bytes_read(LEN * T::SIZE)?;
        decode_into(decoder.reader())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_array_survives_encoding() {
        let mut array = BoxedWordArray::<1000>::new();
        for (i, value) in array.iter_mut().enumerate() {
            *value = (i * 37) as u16;
        }

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&array, config).unwrap();
        assert_eq!(bytes.len(), 2000);

        let (decoded, _): (BoxedWordArray<1000>, usize) =
            bincode::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(decoded, array);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let array = BoxedByteArray::<64>::new();
        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&array, config).unwrap();

        let result: Result<(BoxedByteArray<64>, usize), _> =
            bincode::decode_from_slice(&bytes[..32], config);
        assert!(result.is_err());
    }
}

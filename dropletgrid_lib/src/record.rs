//! Fixed-layout wire records for superdroplets exchanged between ranks
//!
//! A message consists of one [`RecordBatchHeader`] followed by `num_records` tightly packed
//! [`ParticleRecord`]s in native byte order:
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 4    | `schema_version` (u32)         |
//! | 4      | 4    | `num_records` (u32)            |
//! | 8      | 56·n | records                        |
//!
//! Record layout (56 bytes): `id: u64`, `multiplicity: u64`, `coords: [f64; 3]` ordered
//! `(z, x, y)`, `radius: f64`, `solute_mass: f64`.

use bytemuck_derive::{Pod, Zeroable};
use thiserror::Error as ThisError;

use crate::Real;
use crate::superdroplet::{Superdroplet, SuperdropletAttributes, SuperdropletId};

/// Version of the record layout, incremented on every change of [`ParticleRecord`]
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Wire representation of a single superdroplet
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Debug, Default, Pod, Zeroable)]
pub struct ParticleRecord {
    pub id: u64,
    pub multiplicity: u64,
    pub coords: [f64; 3],
    pub radius: f64,
    pub solute_mass: f64,
}

/// Header preceding every batch of records
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Pod, Zeroable)]
pub struct RecordBatchHeader {
    pub schema_version: u32,
    pub num_records: u32,
}

/// Size of an encoded [`ParticleRecord`] in bytes
pub const RECORD_SIZE: usize = std::mem::size_of::<ParticleRecord>();
/// Size of an encoded [`RecordBatchHeader`] in bytes
pub const HEADER_SIZE: usize = std::mem::size_of::<RecordBatchHeader>();

/// Errors that can occur when encoding or decoding record batches
#[derive(Clone, PartialEq, Eq, Debug, ThisError)]
#[non_exhaustive]
pub enum RecordError {
    /// The message is shorter than a batch header
    #[error("record batch of {0} bytes is too short to contain a header")]
    MissingHeader(usize),
    /// The batch was encoded with an unknown layout version
    #[error("unsupported record schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
    /// The payload length does not match the number of records announced by the header
    #[error("record batch announces {num_records} records but carries {payload_bytes} payload bytes")]
    LengthMismatch {
        num_records: usize,
        payload_bytes: usize,
    },
    /// More records than the header can announce
    #[error("too many records for a single batch: {0}")]
    TooManyRecords(usize),
    /// A superdroplet value cannot be represented in the record or target real type
    #[error("values of superdroplet {0} cannot be represented by the target real type")]
    Conversion(u64),
}

/// Number of bytes of an encoded batch with the given number of records
#[inline(always)]
pub fn encoded_len(num_records: usize) -> usize {
    HEADER_SIZE + num_records * RECORD_SIZE
}

impl ParticleRecord {
    /// Converts a superdroplet into its wire representation
    pub fn from_superdroplet<R: Real>(drop: &Superdroplet<R>) -> Result<Self, RecordError> {
        let conversion_error = || RecordError::Conversion(drop.id.0);
        let coords = f64::try_convert_vec_from(&drop.coords).ok_or_else(conversion_error)?;
        Ok(Self {
            id: drop.id.0,
            multiplicity: drop.attributes.multiplicity,
            coords: [coords[0], coords[1], coords[2]],
            radius: drop.attributes.radius.try_convert().ok_or_else(conversion_error)?,
            solute_mass: drop
                .attributes
                .solute_mass
                .try_convert()
                .ok_or_else(conversion_error)?,
        })
    }

    /// Converts the record back into a superdroplet that is not yet assigned to a gridbox
    pub fn to_superdroplet<R: Real>(&self) -> Result<Superdroplet<R>, RecordError> {
        let conversion_error = || RecordError::Conversion(self.id);
        let coords = nalgebra::Vector3::from(self.coords);
        Ok(Superdroplet::new(
            SuperdropletId(self.id),
            R::try_convert_vec_from(&coords).ok_or_else(conversion_error)?,
            SuperdropletAttributes {
                multiplicity: self.multiplicity,
                radius: self.radius.try_convert().ok_or_else(conversion_error)?,
                solute_mass: self.solute_mass.try_convert().ok_or_else(conversion_error)?,
            },
        ))
    }
}

/// Encodes a batch of records into a message
pub fn encode_batch(records: &[ParticleRecord]) -> Result<Vec<u8>, RecordError> {
    let num_records =
        u32::try_from(records.len()).map_err(|_| RecordError::TooManyRecords(records.len()))?;
    let header = RecordBatchHeader {
        schema_version: RECORD_SCHEMA_VERSION,
        num_records,
    };

    let mut bytes = Vec::with_capacity(encoded_len(records.len()));
    bytes.extend_from_slice(bytemuck::bytes_of(&header));
    bytes.extend_from_slice(bytemuck::cast_slice(records));
    Ok(bytes)
}

/// Decodes a message into its records, validating header, version and length
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<ParticleRecord>, RecordError> {
    if bytes.len() < HEADER_SIZE {
        return Err(RecordError::MissingHeader(bytes.len()));
    }

    let (header_bytes, payload) = bytes.split_at(HEADER_SIZE);
    let header: RecordBatchHeader = bytemuck::pod_read_unaligned(header_bytes);
    if header.schema_version != RECORD_SCHEMA_VERSION {
        return Err(RecordError::SchemaVersion {
            found: header.schema_version,
            expected: RECORD_SCHEMA_VERSION,
        });
    }

    let num_records = header.num_records as usize;
    if payload.len() != num_records * RECORD_SIZE {
        return Err(RecordError::LengthMismatch {
            num_records,
            payload_bytes: payload.len(),
        });
    }

    // Message buffers carry no alignment guarantee
    Ok(bytemuck::pod_collect_to_vec(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64) -> ParticleRecord {
        ParticleRecord {
            id,
            multiplicity: 1 << 40,
            coords: [1.5, -2.0, 1e3],
            radius: 1e-6,
            solute_mass: 3e-19,
        }
    }

    #[test]
    fn test_layout() {
        assert_eq!(RECORD_SIZE, 56);
        assert_eq!(HEADER_SIZE, 8);
        assert_eq!(encoded_len(3), 8 + 3 * 56);
    }

    #[test]
    fn test_decode_validates() {
        let bytes = encode_batch(&[record(1), record(2)]).unwrap();
        assert_eq!(decode_batch(&bytes).unwrap(), vec![record(1), record(2)]);

        assert_eq!(
            decode_batch(&bytes[..4]),
            Err(RecordError::MissingHeader(4))
        );
        assert_eq!(
            decode_batch(&bytes[..bytes.len() - 1]),
            Err(RecordError::LengthMismatch {
                num_records: 2,
                payload_bytes: 2 * RECORD_SIZE - 1
            })
        );

        let mut wrong_version = bytes.clone();
        wrong_version[..4].copy_from_slice(&7u32.to_ne_bytes());
        assert_eq!(
            decode_batch(&wrong_version),
            Err(RecordError::SchemaVersion {
                found: 7,
                expected: RECORD_SCHEMA_VERSION
            })
        );
    }

    #[test]
    fn test_unaligned_payload() {
        let bytes = encode_batch(&[record(9)]).unwrap();
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        assert_eq!(decode_batch(&shifted[1..]).unwrap(), vec![record(9)]);
    }

    #[test]
    fn test_superdroplet_conversion() {
        let drop: Superdroplet<f32> = record(4).to_superdroplet().unwrap();
        assert_eq!(drop.id, SuperdropletId(4));
        assert_eq!(drop.coords[2], 1000.0);
        let back = ParticleRecord::from_superdroplet(&drop).unwrap();
        assert_eq!(back.multiplicity, 1 << 40);
        assert_eq!(back.coords, [1.5, -2.0, 1e3]);
    }
}

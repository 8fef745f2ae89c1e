//! Erasure codec boundary.
//!
//! The read path only ever sees the [`BlockCodec`] trait: a pure function
//! pair that splits an object into k+m equal-size blocks and reconstructs it
//! from any k of them. The shipped implementation is a systematic
//! Reed-Solomon code over GF(2^8).

use std::collections::HashMap;

use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid erasure parameters k={k}, m={m}")]
    InvalidParams { k: usize, m: usize },

    #[error("object of {0} bytes exceeds the stripe length header")]
    ObjectTooLarge(usize),

    #[error("need {need} distinct blocks to decode, have {have}")]
    NotEnoughBlocks { have: usize, need: usize },

    #[error("block index {0} out of range")]
    BlockIndexOutOfRange(usize),

    #[error("blocks have mismatched lengths")]
    MismatchedLengths,

    #[error("stripe is corrupt: payload length header does not fit the data")]
    CorruptStripe,

    #[error("reed-solomon failure: {0}")]
    ReedSolomon(#[from] reed_solomon_erasure::Error),
}

/// A systematic (k, m) erasure code: `encode` produces k+m equal-size
/// blocks, `decode` reconstructs the object from any k distinct blocks.
pub trait BlockCodec: Send + Sync {
    /// Number of data blocks (the decode quorum).
    fn data_blocks(&self) -> usize;

    /// Total blocks per object, k + m.
    fn total_blocks(&self) -> usize;

    /// Split an object into k+m blocks.
    fn encode(&self, data: &[u8]) -> Result<Vec<Bytes>, CodecError>;

    /// Reconstruct an object from at least k distinct `(index, bytes)`
    /// blocks. No partial decoding: anything less than k fails.
    fn decode(&self, blocks: &[(usize, Bytes)]) -> Result<Vec<u8>, CodecError>;
}

/// Reed-Solomon implementation of [`BlockCodec`].
///
/// The object length is stored in a 4-byte header inside the stripe so
/// decode can strip the zero padding introduced by splitting into k
/// equal-size shards. With m = 0 the code degenerates to plain striping.
pub struct StripeCodec {
    k: usize,
    m: usize,
    rs: Option<ReedSolomon>,
}

const LEN_HEADER: usize = 4;

impl StripeCodec {
    pub fn new(k: usize, m: usize) -> Result<Self, CodecError> {
        if k == 0 || k + m > 256 {
            return Err(CodecError::InvalidParams { k, m });
        }
        let rs = if m > 0 {
            Some(ReedSolomon::new(k, m)?)
        } else {
            None
        };
        Ok(Self { k, m, rs })
    }
}

impl BlockCodec for StripeCodec {
    fn data_blocks(&self) -> usize {
        self.k
    }

    fn total_blocks(&self) -> usize {
        self.k + self.m
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<Bytes>, CodecError> {
        let payload_len =
            u32::try_from(data.len()).map_err(|_| CodecError::ObjectTooLarge(data.len()))?;

        let stripe_len = LEN_HEADER + data.len();
        let shard_len = stripe_len.div_ceil(self.k);

        let mut stripe = Vec::with_capacity(shard_len * self.k);
        stripe.extend_from_slice(&payload_len.to_be_bytes());
        stripe.extend_from_slice(data);
        stripe.resize(shard_len * self.k, 0);

        let mut shards: Vec<Vec<u8>> = stripe.chunks(shard_len).map(|c| c.to_vec()).collect();
        shards.resize(self.k + self.m, vec![0u8; shard_len]);

        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)?;
        }

        Ok(shards.into_iter().map(Bytes::from).collect())
    }

    fn decode(&self, blocks: &[(usize, Bytes)]) -> Result<Vec<u8>, CodecError> {
        let total = self.k + self.m;
        let mut by_index: HashMap<usize, &Bytes> = HashMap::with_capacity(blocks.len());
        let mut shard_len = 0usize;
        for (index, bytes) in blocks {
            if *index >= total {
                return Err(CodecError::BlockIndexOutOfRange(*index));
            }
            if shard_len == 0 {
                shard_len = bytes.len();
            } else if bytes.len() != shard_len {
                return Err(CodecError::MismatchedLengths);
            }
            by_index.insert(*index, bytes);
        }

        if by_index.len() < self.k {
            return Err(CodecError::NotEnoughBlocks {
                have: by_index.len(),
                need: self.k,
            });
        }

        let missing_data = (0..self.k).any(|i| !by_index.contains_key(&i));
        let data_shards: Vec<Vec<u8>> = if missing_data {
            let rs = self.rs.as_ref().ok_or(CodecError::NotEnoughBlocks {
                have: by_index.len(),
                need: self.k,
            })?;
            let mut shards: Vec<Option<Vec<u8>>> = (0..total)
                .map(|i| by_index.get(&i).map(|b| b.to_vec()))
                .collect();
            rs.reconstruct_data(&mut shards)?;
            shards
                .into_iter()
                .take(self.k)
                .map(|s| s.ok_or(CodecError::CorruptStripe))
                .collect::<Result<_, _>>()?
        } else {
            (0..self.k)
                .map(|i| by_index[&i].to_vec())
                .collect()
        };

        let stripe: Vec<u8> = data_shards.concat();
        if stripe.len() < LEN_HEADER {
            return Err(CodecError::CorruptStripe);
        }
        let payload_len =
            u32::from_be_bytes([stripe[0], stripe[1], stripe[2], stripe[3]]) as usize;
        if LEN_HEADER + payload_len > stripe.len() {
            return Err(CodecError::CorruptStripe);
        }

        Ok(stripe[LEN_HEADER..LEN_HEADER + payload_len].to_vec())
    }
}

//! CID-based content addressing with SHA-2 family verification
//!
//! Parses CIDv0/v1 identifiers, computes multihash digests and verifies
//! that block payloads match the digest their CID claims. Verification is
//! byte-exact; a mismatch is a data-integrity failure that no retry can
//! fix.

use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};
use thiserror::Error;

/// sha2-256 multihash code
/// See: https://github.com/multiformats/multicodec/blob/master/table.csv
pub const SHA2_256_CODE: u64 = 0x12;

/// sha2-512 multihash code
pub const SHA2_512_CODE: u64 = 0x13;

/// sha3-512 multihash code
pub const SHA3_512_CODE: u64 = 0x14;

/// sha3-256 multihash code
pub const SHA3_256_CODE: u64 = 0x16;

/// blake3 multihash code
pub const BLAKE3_CODE: u64 = 0x1e;

/// Raw (unframed) leaf block codec
pub const RAW_CODEC: u64 = 0x55;

/// DAG-PB codec used by UnixFS nodes
pub const DAG_PB_CODEC: u64 = 0x70;

/// A CIDv0 is a bare sha2-256 multihash: code 0x12, digest length 0x20
const CIDV0_PREFIX: [u8; 2] = [0x12, 0x20];
const CIDV0_LEN: usize = 34;

#[derive(Debug, Error)]
pub enum CidError {
    #[error("invalid CID: {0}")]
    InvalidCid(String),

    #[error("CIDv{0} is not supported")]
    UnsupportedVersion(u64),

    #[error("multihash function 0x{0:x} is not supported")]
    UnsupportedHash(u64),

    #[error("digest mismatch for block {cid}")]
    HashMismatch { cid: Cid },

    #[error("multihash error: {0}")]
    Multihash(String),
}

/// Compute the digest of a payload for a multihash function code
pub fn digest_of(code: u64, payload: &[u8]) -> Result<Vec<u8>, CidError> {
    match code {
        SHA2_256_CODE => Ok(Sha256::digest(payload).to_vec()),
        SHA2_512_CODE => Ok(Sha512::digest(payload).to_vec()),
        SHA3_512_CODE => Ok(Sha3_512::digest(payload).to_vec()),
        SHA3_256_CODE => Ok(Sha3_256::digest(payload).to_vec()),
        BLAKE3_CODE => Ok(blake3::hash(payload).as_bytes().to_vec()),
        other => Err(CidError::UnsupportedHash(other)),
    }
}

/// Parse a CID from its canonical string form
pub fn parse_cid(text: &str) -> Result<Cid, CidError> {
    text.parse()
        .map_err(|e: cid::Error| CidError::InvalidCid(format!("{text}: {e}")))
}

/// Verify that a payload matches the digest its CID claims
pub fn verify(cid: &Cid, payload: &[u8]) -> Result<(), CidError> {
    let hash = cid.hash();
    let computed = digest_of(hash.code(), payload)?;
    if computed.as_slice() != hash.digest() {
        return Err(CidError::HashMismatch { cid: *cid });
    }
    Ok(())
}

/// Compute a CIDv1 with the given content codec over a sha2-256 digest
pub fn cid_v1_sha2(codec: u64, payload: &[u8]) -> Cid {
    let digest = Sha256::digest(payload);
    let mh = Multihash::wrap(SHA2_256_CODE, &digest).expect("sha2-256 digest length is valid");
    Cid::new_v1(codec, mh)
}

/// Compute a CIDv0 (dag-pb, sha2-256) for a payload
pub fn cid_v0_sha2(payload: &[u8]) -> Cid {
    let digest = Sha256::digest(payload);
    let mh = Multihash::wrap(SHA2_256_CODE, &digest).expect("sha2-256 digest length is valid");
    Cid::new_v0(mh).expect("sha2-256 multihash is valid for CIDv0")
}

/// Split a CID prefix off the front of a CAR block body
///
/// The CID size is variable but not explicit in the CAR framing, so the
/// prefix has to be partially decoded to find where the payload starts.
/// Returns the CID and the number of bytes it occupied.
pub fn split_cid_prefix(data: &[u8]) -> Result<(Cid, usize), CidError> {
    if data.len() >= 2 && data[0..2] == CIDV0_PREFIX {
        if data.len() < CIDV0_LEN {
            return Err(CidError::InvalidCid("truncated CIDv0".to_string()));
        }
        let mh = Multihash::wrap(SHA2_256_CODE, &data[2..CIDV0_LEN])
            .map_err(|e| CidError::Multihash(e.to_string()))?;
        let cid = Cid::new_v0(mh).map_err(|e| CidError::InvalidCid(e.to_string()))?;
        return Ok((cid, CIDV0_LEN));
    }

    let (version, rest) = decode_varint(data)?;
    if version != 1 {
        return Err(CidError::UnsupportedVersion(version));
    }
    let (codec, rest) = decode_varint(rest)?;
    let (hash_code, rest) = decode_varint(rest)?;
    let (digest_len, rest) = decode_varint(rest)?;
    let digest_len = digest_len as usize;
    if rest.len() < digest_len {
        return Err(CidError::InvalidCid("truncated CID digest".to_string()));
    }
    let mh = Multihash::wrap(hash_code, &rest[..digest_len])
        .map_err(|e| CidError::Multihash(e.to_string()))?;
    let consumed = data.len() - rest.len() + digest_len;
    Ok((Cid::new_v1(codec, mh), consumed))
}

fn decode_varint(data: &[u8]) -> Result<(u64, &[u8]), CidError> {
    unsigned_varint::decode::u64(data)
        .map_err(|e| CidError::InvalidCid(format!("bad varint in CID: {e}")))
}

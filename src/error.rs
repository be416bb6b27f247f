//! Error conditions callers may want to match on
//!
//! These travel inside `anyhow::Error`; recover them with `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpikeError {
    /// Alignment operation the engine cannot reason about (N, P, unknown)
    #[error("invalid CIGAR operation '{op}' at tid {tid} pos {pos} for read {read}")]
    MalformedCigar {
        read: String,
        op: char,
        tid: i32,
        pos: i64,
    },

    /// CIGAR consumes more query bases than the stored sequence holds
    #[error("read {read} CIGAR reaches query offset {query_pos} but sequence length is {len}")]
    QueryOutOfBounds {
        read: String,
        query_pos: usize,
        len: usize,
    },

    #[error("allele fraction {0} is outside [0, 1]")]
    InvalidAlleleFraction(f64),
}

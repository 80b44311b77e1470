use crate::error::{RpcError, Result};
use crate::group::ProcessGroup;
use crate::types::{MAX_WORKER_ID, Rank, WorkerId};
use std::collections::HashMap;

/// Width of the length field exchanged in the first gather round.
const LEN_FIELD: usize = std::mem::size_of::<u64>();

/// Exchange worker names over the group.
///
/// Two all-gather rounds, no coordinator:
/// 1. every rank contributes the byte length of its name (u64 LE);
/// 2. every rank contributes its name zero-padded to the longest length.
///
/// Each rank then truncates buffer `r` to `lengths[r]`, so all ranks end up
/// with the same `names[r]` for every rank `r`, including their own.
pub(crate) async fn collect_worker_names(
    group: &ProcessGroup,
    local_name: &str,
) -> Result<Vec<String>> {
    let name_bytes = local_name.as_bytes();
    let len_buf = (name_bytes.len() as u64).to_le_bytes();

    let lengths = decode_lengths(&group.all_gather(&len_buf).await?)?;
    let max_len = lengths.iter().copied().max().unwrap_or(0);

    let padded = pad_name(name_bytes, max_len);
    let buffers = group.all_gather(&padded).await?;

    decode_names(&lengths, &buffers)
}

/// Right-pad `name` with zeros to `len` bytes.
fn pad_name(name: &[u8], len: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(len.max(name.len()));
    buf.extend_from_slice(name);
    buf.resize(len.max(name.len()), 0);
    buf
}

fn decode_lengths(raw: &[Vec<u8>]) -> Result<Vec<usize>> {
    raw.iter()
        .enumerate()
        .map(|(rank, buf)| {
            let bytes: [u8; LEN_FIELD] = buf.as_slice().try_into().map_err(|_| {
                RpcError::DecodeFailed(format!(
                    "name length from rank {rank} is {} bytes, expected {LEN_FIELD}",
                    buf.len()
                ))
            })?;
            usize::try_from(u64::from_le_bytes(bytes)).map_err(|_| {
                RpcError::DecodeFailed(format!("name length from rank {rank} overflows usize"))
            })
        })
        .collect()
}

fn decode_names(lengths: &[usize], buffers: &[Vec<u8>]) -> Result<Vec<String>> {
    if lengths.len() != buffers.len() {
        return Err(RpcError::DecodeFailed(format!(
            "{} name lengths but {} name buffers",
            lengths.len(),
            buffers.len()
        )));
    }

    lengths
        .iter()
        .zip(buffers)
        .enumerate()
        .map(|(rank, (&len, buf))| {
            let bytes = buf.get(..len).ok_or_else(|| {
                RpcError::DecodeFailed(format!(
                    "name from rank {rank} declares {len} bytes but only {} arrived",
                    buf.len()
                ))
            })?;
            String::from_utf8(bytes.to_vec()).map_err(|e| {
                RpcError::DecodeFailed(format!("name from rank {rank} is not valid UTF-8: {e}"))
            })
        })
        .collect()
}

/// Immutable name <-> id mapping shared by every worker after startup.
#[derive(Debug, Clone)]
pub struct NameTable {
    by_name: HashMap<String, WorkerId>,
    by_id: Vec<WorkerId>,
}

impl NameTable {
    /// Build the table from `names[rank]`.
    ///
    /// Duplicate names are a caller error: the highest rank wins the name
    /// and a warning is logged. Groups with more than `MAX_WORKER_ID + 1`
    /// ranks are rejected.
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        if names.len() > MAX_WORKER_ID as usize + 1 {
            return Err(RpcError::InvalidArgument(format!(
                "{} workers exceed the maximum worker id {MAX_WORKER_ID}",
                names.len()
            )));
        }

        let mut by_name: HashMap<String, WorkerId> = HashMap::with_capacity(names.len());
        let mut by_id = Vec::with_capacity(names.len());

        for (id, name) in names.into_iter().enumerate() {
            let worker = WorkerId::new(name, id as Rank);
            if let Some(prev) = by_name.insert(worker.name.clone(), worker.clone()) {
                tracing::warn!(
                    name = %worker.name,
                    previous = prev.id,
                    current = worker.id,
                    "duplicate worker name, the later rank wins"
                );
            }
            by_id.push(worker);
        }

        Ok(Self { by_name, by_id })
    }

    /// Look up a worker by name.
    pub fn resolve(&self, name: &str) -> Result<WorkerId> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::NotFound {
                name: name.to_owned(),
            })
    }

    /// The worker registered by rank `id`.
    pub fn by_id(&self, id: Rank) -> Option<&WorkerId> {
        self.by_id.get(id as usize)
    }

    /// Number of ranks in the table.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All workers in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkerId> {
        self.by_id.iter()
    }
}

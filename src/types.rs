/// Rank of a participant in the process group (0-indexed).
pub type Rank = u32;

/// Largest worker id the agent accepts. Ids must fit a 16-bit signed
/// integer, so larger groups are rejected at startup.
pub const MAX_WORKER_ID: Rank = i16::MAX as Rank;

/// Current protocol version, checked in the mesh `Hello` handshake.
pub const PROTOCOL_VERSION: u16 = 1;

/// A globally unique identity for one RPC worker.
///
/// `name` is chosen by the application at `initialize` time; `id` is the
/// worker's rank in the process group. Every process holds the same
/// name <-> id mapping once initialization completes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub name: String,
    pub id: Rank,
}

impl WorkerId {
    pub fn new(name: impl Into<String>, id: Rank) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Priority levels carried in the frame header.
///
/// Barriers use `Critical`, RPC traffic uses `Realtime`, collective payloads
/// use `Bulk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    /// Highest priority: barriers, handshakes.
    Critical = 0,
    /// Medium priority: RPC requests and responses.
    Realtime = 1,
    /// Lowest priority: all-gather payloads.
    Bulk = 2,
}

impl Priority {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Priority::Critical),
            1 => Some(Priority::Realtime),
            2 => Some(Priority::Bulk),
            _ => None,
        }
    }
}

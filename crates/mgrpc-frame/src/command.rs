use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// An outgoing request body.
///
/// An `id` of zero means "unassigned"; the client replaces it with
/// [`next_command_id`] before the command is sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Command {
    #[serde(default)]
    pub id: i64,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    /// Server-side execution budget in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Command {
    /// Create a command for `method` with no arguments and an unassigned ID.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            cmd: method.into(),
            ..Self::default()
        }
    }

    /// Attach JSON arguments.
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Pin an explicit request ID.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }
}

static NEXT_ID: OnceLock<AtomicI64> = OnceLock::new();

/// Generate a process-wide unique, nonzero command ID.
///
/// The sequence starts from a value derived from the wall clock (so restarts
/// rarely collide with IDs a peer may still remember) and is strictly
/// increasing afterwards.
pub fn next_command_id() -> i64 {
    let counter = NEXT_ID.get_or_init(|| AtomicI64::new(initial_seed()));
    loop {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        if id > 0 {
            return id;
        }
        // Wrapped past i64::MAX; restart the positive range.
        let _ = counter.compare_exchange(
            id.wrapping_add(1),
            1,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }
}

fn initial_seed() -> i64 {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    // Keep the seed well below i64::MAX so the counter has room to grow.
    ((micros as u64) & 0x000F_FFFF_FFFF_FFFF) as i64 + 1
}

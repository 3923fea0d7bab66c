//! Resource-usage snapshots periodically pushed by a node.

use serde::Deserialize;

/// Statistical information about a node, received over the websocket
/// roughly once a minute.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// How long the node has been running, in milliseconds.
    pub uptime: u64,
    /// Players currently connected to the node.
    pub players: u32,
    /// Players currently connected and playing audio.
    pub playing_players: u32,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    /// Audio frame statistics. Absent until the node has players.
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

/// Memory information about a node, in bytes.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

impl MemoryStats {
    /// Total amount of memory on the node, in bytes.
    pub fn total(&self) -> u64 {
        self.free + self.used + self.allocated + self.reservable
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Audio frames sent to Discord over the last minute.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

impl Stats {
    /// Load-balancing penalty for the node. Higher means busier; a player
    /// looking for a home should prefer the node with the lowest value.
    ///
    /// Combines the playing-player count with an exponential CPU penalty
    /// and, when frame stats are available, penalties for nulled and
    /// deficit frames.
    pub fn penalty(&self) -> f64 {
        let cpu_penalty = 1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0;

        let mut frame_penalty = 0.0;
        if let Some(frames) = &self.frame_stats {
            if frames.nulled >= 0 {
                frame_penalty +=
                    1.03f64.powf(500.0 * (frames.nulled as f64 / 3000.0)) * 600.0 - 600.0;
            }
            if frames.deficit >= 0 {
                frame_penalty +=
                    1.03f64.powf(500.0 * (frames.deficit as f64 / 3000.0)) * 600.0 - 600.0;
            }
        }

        self.playing_players as f64 + cpu_penalty + frame_penalty
    }
}

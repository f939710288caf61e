//! Engine identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Collection → key → opaque bytes.
    Kv,
    /// Collection → id → structured document.
    Document,
    /// Table → column → row-id → value.
    Column,
    /// Nodes, edges, adjacency lists.
    Graph,
    /// Series of timestamped points.
    #[serde(rename = "timeseries")]
    TimeSeries,
}

impl EngineKind {
    /// All engines, in scoring order.
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Kv,
        EngineKind::Document,
        EngineKind::Column,
        EngineKind::Graph,
        EngineKind::TimeSeries,
    ];

    /// Stable lowercase name, also the on-disk directory name the facade
    /// uses for the engine.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Kv => "kv",
            EngineKind::Document => "document",
            EngineKind::Column => "column",
            EngineKind::Graph => "graph",
            EngineKind::TimeSeries => "timeseries",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kv" => Ok(EngineKind::Kv),
            "document" => Ok(EngineKind::Document),
            "column" => Ok(EngineKind::Column),
            "graph" => Ok(EngineKind::Graph),
            "timeseries" => Ok(EngineKind::TimeSeries),
            other => Err(format!("unknown engine kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(kind.as_str().parse::<EngineKind>().unwrap(), kind);
        }
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let text = serde_json::to_string(&EngineKind::TimeSeries).unwrap();
        assert_eq!(text, "\"timeseries\"");
        let kind: EngineKind = serde_json::from_str("\"kv\"").unwrap();
        assert_eq!(kind, EngineKind::Kv);
    }
}

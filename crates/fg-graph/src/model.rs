use std::str::FromStr;

use fg_core::CallType;
use serde::{Deserialize, Serialize};

/// Node sub-label: a defined function with a body, or an external leaf
/// whose body was not analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Function,
    External,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::External => "external",
        };
        write!(f, "{s}")
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "external" => Ok(Self::External),
            other => Err(format!("unknown NodeKind: {other}")),
        }
    }
}

/// A committed Function (or External) node.
///
/// `id` is the store-internal row id; identity within a snapshot is
/// `(name, file_path)`. External nodes carry an empty `file_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNode {
    pub id: i64,
    pub kind: NodeKind,
    pub name: String,
    pub file_path: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub content: Option<String>,
    pub language: Option<String>,
    pub return_type: Option<String>,
    pub parameters: Option<String>,
    pub is_entry_point: bool,
    pub confidence: f64,
    pub cyclomatic_complexity: Option<i64>,
}

/// A caller or callee adjacent to a queried function, with the edge
/// attributes that connect them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNeighbor {
    pub function: FunctionNode,
    pub call_type: CallType,
    pub confidence: f64,
    pub backend: String,
}

/// Edge of a local subgraph extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtreeEdge {
    pub caller_id: i64,
    pub callee_id: i64,
    pub call_type: CallType,
}

/// N-hop neighbourhood around one function, for visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtree {
    pub nodes: Vec<FunctionNode>,
    pub edges: Vec<SubtreeEdge>,
}

/// A function reached by a fuzzer together with its minimum depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachedFunction {
    pub function: FunctionNode,
    pub depth: i64,
}

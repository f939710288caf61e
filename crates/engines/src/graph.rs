//! Graph engine.
//!
//! Nodes and edges live in flat per-graph maps keyed by id; adjacency lists
//! store ids only, so there are no ownership cycles. Edge attributes carry
//! the structural `from`/`to` endpoints, which are never indexed; every
//! other node and edge attribute feeds a secondary equality index.

use crate::engine::{check_name, decode_object_payload, StorageEngine};
use parking_lot::Mutex;
use polystore_core::{Error, Filter, Object, Result, Value};
use polystore_durability::{SnapshotStore, Wal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Structural edge fields that never enter the secondary index.
const STRUCTURAL_FIELDS: [&str; 2] = ["from", "to"];

/// Name limits and query caps for the graph engine.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Maximum graph name length in bytes.
    pub max_graph_name_len: usize,
    /// Maximum node/edge id length in bytes.
    pub max_node_id_len: usize,
    /// Maximum number of paths a path query returns.
    pub max_path_results: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            max_graph_name_len: 128,
            max_node_id_len: 256,
            max_path_results: 10,
        }
    }
}

/// Which edges to follow from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Incoming edges only.
    In,
    /// Outgoing edges only.
    Out,
    /// Both directions.
    Both,
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "both" => Ok(Direction::Both),
            other => Err(Error::InvalidArgument(format!(
                "direction must be in/out/both, got {}",
                other
            ))),
        }
    }
}

/// Traversal direction of an edge relative to the queried node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// The queried node is the edge's `from` endpoint.
    Outgoing,
    /// The queried node is the edge's `to` endpoint.
    Incoming,
}

/// One adjacent edge of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// The node on the far end of the edge.
    pub neighbor_id: String,
    /// The connecting edge.
    pub edge_id: String,
    /// Whether the edge leaves or enters the queried node.
    pub direction: EdgeDirection,
    /// Full edge attributes, including `from`/`to`.
    pub edge_attrs: Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
enum GraphRecord {
    #[serde(rename = "ADD_NODE")]
    AddNode {
        graph: String,
        node_id: String,
        attrs: Value,
    },
    #[serde(rename = "ADD_EDGE")]
    AddEdge {
        graph: String,
        edge_id: String,
        attrs: Value,
    },
    #[serde(rename = "DELETE_NODE")]
    DeleteNode { graph: String, node_id: String },
    #[serde(rename = "DELETE_EDGE")]
    DeleteEdge { graph: String, edge_id: String },
}

/// Primary state of one graph.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct GraphData {
    nodes: BTreeMap<String, Object>,
    edges: BTreeMap<String, Object>,
}

#[derive(Debug, Default, Clone)]
struct Adjacency {
    outgoing: BTreeSet<String>,
    incoming: BTreeSet<String>,
}

type GraphStore = BTreeMap<String, GraphData>;
/// graph → field → index key → ids
type AttrIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>;

#[derive(Default)]
struct GraphState {
    store: GraphStore,
    node_index: AttrIndex,
    edge_index: AttrIndex,
    adjacency: BTreeMap<String, BTreeMap<String, Adjacency>>,
}

/// Graph storage engine.
pub struct GraphEngine {
    config: GraphConfig,
    state: Mutex<GraphState>,
    wal: Wal<GraphRecord>,
    snapshots: SnapshotStore,
}

impl GraphEngine {
    /// Create an engine with default limits.
    pub fn new(wal_path: impl AsRef<Path>, snap_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(wal_path, snap_path, GraphConfig::default())
    }

    /// Create an engine with explicit limits.
    pub fn with_config(
        wal_path: impl AsRef<Path>,
        snap_path: impl AsRef<Path>,
        config: GraphConfig,
    ) -> Result<Self> {
        Ok(GraphEngine {
            config,
            state: Mutex::new(GraphState::default()),
            wal: Wal::open(wal_path)?,
            snapshots: SnapshotStore::new(snap_path.as_ref()),
        })
    }

    /// Load the latest snapshot, rebuild indexes and adjacency, replay the
    /// WAL, rotate.
    pub fn startup(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.store = self.snapshots.load("latest")?;
        rebuild_derived(&mut state);

        let records = self.wal.replay()?;
        let replayed = records.len();
        for record in records {
            apply(&mut state, record)?;
        }
        self.wal.rotate()?;
        info!(replayed, graphs = state.store.len(), "graph engine started");
        Ok(())
    }

    /// Snapshot the primary store as `latest` and close the WAL.
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state.lock();
        self.snapshots.create("latest", &state.store)?;
        self.wal.close()
    }

    /// Add or replace a node.
    pub fn add_node(&self, graph: &str, node_id: &str, attrs: Value) -> Result<()> {
        self.validate_names(graph, node_id)?;
        let attrs = attrs.into_object().map_err(|actual| {
            Error::InvalidArgument(format!("node attributes must be an object, got {}", actual))
        })?;

        let record = GraphRecord::AddNode {
            graph: graph.to_string(),
            node_id: node_id.to_string(),
            attrs: Value::Object(attrs),
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)
    }

    /// Read a node's attributes.
    pub fn get_node(&self, graph: &str, node_id: &str) -> Result<Option<Value>> {
        self.validate_names(graph, node_id)?;
        let state = self.state.lock();
        Ok(state
            .store
            .get(graph)
            .and_then(|data| data.nodes.get(node_id))
            .cloned()
            .map(Value::Object))
    }

    /// Delete a node together with every incident edge.
    pub fn delete_node(&self, graph: &str, node_id: &str) -> Result<bool> {
        self.validate_names(graph, node_id)?;

        let mut state = self.state.lock();
        let present = state
            .store
            .get(graph)
            .is_some_and(|data| data.nodes.contains_key(node_id));
        if !present {
            return Ok(false);
        }

        let record = GraphRecord::DeleteNode {
            graph: graph.to_string(),
            node_id: node_id.to_string(),
        };
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        Ok(true)
    }

    /// Add or replace an edge between two nodes.
    ///
    /// `attrs` may be `Null` for an attribute-less edge; `from`/`to` are
    /// stored as structural attributes and re-point adjacency on replace.
    pub fn add_edge(
        &self,
        graph: &str,
        edge_id: &str,
        from: &str,
        to: &str,
        attrs: Value,
    ) -> Result<()> {
        check_name("graph name", graph, self.config.max_graph_name_len)?;
        check_name("edge id", edge_id, self.config.max_node_id_len)?;
        check_name("edge from", from, self.config.max_node_id_len)?;
        check_name("edge to", to, self.config.max_node_id_len)?;

        let mut attrs = match attrs {
            Value::Null => Object::new(),
            other => other.into_object().map_err(|actual| {
                Error::InvalidArgument(format!(
                    "edge attributes must be an object, got {}",
                    actual
                ))
            })?,
        };
        attrs.insert("from".to_string(), Value::String(from.to_string()));
        attrs.insert("to".to_string(), Value::String(to.to_string()));

        let record = GraphRecord::AddEdge {
            graph: graph.to_string(),
            edge_id: edge_id.to_string(),
            attrs: Value::Object(attrs),
        };
        let mut state = self.state.lock();
        self.wal.append(&record)?;
        apply(&mut state, record)
    }

    /// Delete an edge, adjusting adjacency on both endpoints.
    pub fn delete_edge(&self, graph: &str, edge_id: &str) -> Result<bool> {
        check_name("graph name", graph, self.config.max_graph_name_len)?;
        check_name("edge id", edge_id, self.config.max_node_id_len)?;

        let mut state = self.state.lock();
        let present = state
            .store
            .get(graph)
            .is_some_and(|data| data.edges.contains_key(edge_id));
        if !present {
            return Ok(false);
        }

        let record = GraphRecord::DeleteEdge {
            graph: graph.to_string(),
            edge_id: edge_id.to_string(),
        };
        self.wal.append(&record)?;
        apply(&mut state, record)?;
        Ok(true)
    }

    /// List the edges incident to a node, with the neighbor on the far end.
    pub fn get_neighbors(
        &self,
        graph: &str,
        node_id: &str,
        direction: Direction,
    ) -> Result<Vec<Neighbor>> {
        self.validate_names(graph, node_id)?;
        let state = self.state.lock();

        let Some(adjacency) = state
            .adjacency
            .get(graph)
            .and_then(|nodes| nodes.get(node_id))
        else {
            return Ok(Vec::new());
        };
        let Some(data) = state.store.get(graph) else {
            return Ok(Vec::new());
        };

        let mut neighbors = Vec::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            for edge_id in &adjacency.outgoing {
                if let Some(attrs) = data.edges.get(edge_id) {
                    if let Some(to) = attrs.get("to").and_then(Value::as_str) {
                        neighbors.push(Neighbor {
                            neighbor_id: to.to_string(),
                            edge_id: edge_id.clone(),
                            direction: EdgeDirection::Outgoing,
                            edge_attrs: attrs.clone(),
                        });
                    }
                }
            }
        }
        if matches!(direction, Direction::In | Direction::Both) {
            for edge_id in &adjacency.incoming {
                if let Some(attrs) = data.edges.get(edge_id) {
                    if let Some(from) = attrs.get("from").and_then(Value::as_str) {
                        neighbors.push(Neighbor {
                            neighbor_id: from.to_string(),
                            edge_id: edge_id.clone(),
                            direction: EdgeDirection::Incoming,
                            edge_attrs: attrs.clone(),
                        });
                    }
                }
            }
        }
        Ok(neighbors)
    }

    /// Evaluate a query shape.
    ///
    /// The shape carries one of `node_filter`, `edge_filter`, or `path`; an
    /// empty shape lists every node; any other object is treated as a node
    /// filter.
    pub fn query(&self, graph: &str, shape: &Value) -> Result<Vec<Value>> {
        check_name("graph name", graph, self.config.max_graph_name_len)?;
        let fields = shape.as_object().ok_or_else(|| {
            Error::InvalidArgument(format!("query shape must be an object, got {}", shape.type_name()))
        })?;

        let state = self.state.lock();
        if fields.is_empty() {
            let Some(data) = state.store.get(graph) else {
                return Ok(Vec::new());
            };
            return Ok(data
                .nodes
                .iter()
                .map(|(id, attrs)| with_id(id, attrs))
                .collect());
        }

        if let Some(node_filter) = fields.get("node_filter") {
            let filter = Filter::parse(node_filter)?;
            return Ok(query_attrs(
                &state,
                graph,
                &filter,
                |data| &data.nodes,
                &state.node_index,
            ));
        }
        if let Some(edge_filter) = fields.get("edge_filter") {
            let filter = Filter::parse(edge_filter)?;
            return Ok(query_attrs(
                &state,
                graph,
                &filter,
                |data| &data.edges,
                &state.edge_index,
            ));
        }
        if let Some(path) = fields.get("path") {
            return self.query_path(&state, graph, path);
        }

        let filter = Filter::parse(shape)?;
        Ok(query_attrs(
            &state,
            graph,
            &filter,
            |data| &data.nodes,
            &state.node_index,
        ))
    }

    /// Breadth-first path search over outgoing edges.
    fn query_path(&self, state: &GraphState, graph: &str, shape: &Value) -> Result<Vec<Value>> {
        let fields = shape.as_object().ok_or_else(|| {
            Error::InvalidArgument("path query must be an object".to_string())
        })?;
        let start = fields.get("start").and_then(Value::as_str);
        let end = fields.get("end").and_then(Value::as_str);
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(Vec::new());
        };
        let max_depth = fields
            .get("max_depth")
            .and_then(Value::as_int)
            .unwrap_or(3)
            .max(1) as usize;

        let Some(data) = state.store.get(graph) else {
            return Ok(Vec::new());
        };
        let adjacency = state.adjacency.get(graph);

        let mut queue: VecDeque<Vec<String>> = VecDeque::new();
        queue.push_back(vec![start.to_string()]);
        let mut paths = Vec::new();

        while let Some(path) = queue.pop_front() {
            if paths.len() >= self.config.max_path_results {
                break;
            }
            let current = path.last().cloned().unwrap_or_default();
            if current == end {
                paths.push(path);
                continue;
            }
            if path.len() >= max_depth {
                continue;
            }

            let Some(outgoing) = adjacency
                .and_then(|nodes| nodes.get(&current))
                .map(|adj| &adj.outgoing)
            else {
                continue;
            };
            for edge_id in outgoing {
                let Some(next) = data
                    .edges
                    .get(edge_id)
                    .and_then(|attrs| attrs.get("to"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                // A path that revisits a node is skipped.
                if path.iter().any(|seen| seen == next) {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(next.to_string());
                queue.push_back(extended);
            }
        }

        Ok(paths
            .into_iter()
            .map(|path| {
                let mut row = Object::new();
                row.insert(
                    "path".to_string(),
                    Value::Array(path.into_iter().map(Value::String).collect()),
                );
                Value::Object(row)
            })
            .collect())
    }

    fn validate_names(&self, graph: &str, node_id: &str) -> Result<()> {
        check_name("graph name", graph, self.config.max_graph_name_len)?;
        check_name("node id", node_id, self.config.max_node_id_len)
    }
}

fn with_id(id: &str, attrs: &Object) -> Value {
    let mut row = attrs.clone();
    row.insert("_id".to_string(), Value::String(id.to_string()));
    Value::Object(row)
}

/// Filter nodes or edges, through the index when the filter is a single
/// equality, re-validated against the live attributes.
fn query_attrs<'a>(
    state: &'a GraphState,
    graph: &str,
    filter: &Filter,
    entries: impl Fn(&'a GraphData) -> &'a BTreeMap<String, Object>,
    index: &AttrIndex,
) -> Vec<Value> {
    let Some(data) = state.store.get(graph) else {
        return Vec::new();
    };
    let entries = entries(data);

    if let Some((field, value)) = filter.single_equality() {
        let ids = index
            .get(graph)
            .and_then(|fields| fields.get(field))
            .and_then(|postings| postings.get(&value.index_key()));
        return match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| {
                    entries
                        .get(id)
                        .filter(|attrs| filter.matches(attrs))
                        .map(|attrs| with_id(id, attrs))
                })
                .collect(),
            None => Vec::new(),
        };
    }

    entries
        .iter()
        .filter(|(_, attrs)| filter.matches(attrs))
        .map(|(id, attrs)| with_id(id, attrs))
        .collect()
}

fn rebuild_derived(state: &mut GraphState) {
    state.node_index = AttrIndex::new();
    state.edge_index = AttrIndex::new();
    state.adjacency = BTreeMap::new();

    for (graph, data) in &state.store {
        let adjacency = state.adjacency.entry(graph.clone()).or_default();
        for (node_id, attrs) in &data.nodes {
            for (field, value) in attrs {
                index_insert(&mut state.node_index, graph, field, node_id, value);
            }
            adjacency.entry(node_id.clone()).or_default();
        }
        for (edge_id, attrs) in &data.edges {
            for (field, value) in attrs {
                if !STRUCTURAL_FIELDS.contains(&field.as_str()) {
                    index_insert(&mut state.edge_index, graph, field, edge_id, value);
                }
            }
            if let (Some(from), Some(to)) = (
                attrs.get("from").and_then(Value::as_str),
                attrs.get("to").and_then(Value::as_str),
            ) {
                adjacency
                    .entry(from.to_string())
                    .or_default()
                    .outgoing
                    .insert(edge_id.clone());
                adjacency
                    .entry(to.to_string())
                    .or_default()
                    .incoming
                    .insert(edge_id.clone());
            }
        }
    }
}

fn index_insert(index: &mut AttrIndex, graph: &str, field: &str, id: &str, value: &Value) {
    index
        .entry(graph.to_string())
        .or_default()
        .entry(field.to_string())
        .or_default()
        .entry(value.index_key())
        .or_default()
        .insert(id.to_string());
}

fn index_remove(index: &mut AttrIndex, graph: &str, field: &str, id: &str, value: &Value) {
    let Some(postings) = index
        .get_mut(graph)
        .and_then(|fields| fields.get_mut(field))
    else {
        return;
    };
    let key = value.index_key();
    if let Some(ids) = postings.get_mut(&key) {
        ids.remove(id);
        if ids.is_empty() {
            postings.remove(&key);
        }
    }
}

fn remove_edge(state: &mut GraphState, graph: &str, edge_id: &str) {
    let Some(attrs) = state
        .store
        .get_mut(graph)
        .and_then(|data| data.edges.remove(edge_id))
    else {
        return;
    };
    for (field, value) in &attrs {
        if !STRUCTURAL_FIELDS.contains(&field.as_str()) {
            index_remove(&mut state.edge_index, graph, field, edge_id, value);
        }
    }
    if let Some(adjacency) = state.adjacency.get_mut(graph) {
        if let Some(from) = attrs.get("from").and_then(Value::as_str) {
            if let Some(adj) = adjacency.get_mut(from) {
                adj.outgoing.remove(edge_id);
            }
        }
        if let Some(to) = attrs.get("to").and_then(Value::as_str) {
            if let Some(adj) = adjacency.get_mut(to) {
                adj.incoming.remove(edge_id);
            }
        }
    }
}

fn apply(state: &mut GraphState, record: GraphRecord) -> Result<()> {
    match record {
        GraphRecord::AddNode {
            graph,
            node_id,
            attrs,
        } => {
            let attrs = attrs
                .into_object()
                .map_err(|actual| Error::Corrupt(format!("ADD_NODE record carries {}", actual)))?;

            let data = state.store.entry(graph.clone()).or_default();
            if let Some(old) = data.nodes.get(&node_id).cloned() {
                for (field, value) in &old {
                    index_remove(&mut state.node_index, &graph, field, &node_id, value);
                }
            }
            for (field, value) in &attrs {
                index_insert(&mut state.node_index, &graph, field, &node_id, value);
            }
            data.nodes.insert(node_id.clone(), attrs);
            state
                .adjacency
                .entry(graph)
                .or_default()
                .entry(node_id)
                .or_default();
        }

        GraphRecord::AddEdge {
            graph,
            edge_id,
            attrs,
        } => {
            let attrs = attrs
                .into_object()
                .map_err(|actual| Error::Corrupt(format!("ADD_EDGE record carries {}", actual)))?;
            let (Some(from), Some(to)) = (
                attrs.get("from").and_then(Value::as_str).map(String::from),
                attrs.get("to").and_then(Value::as_str).map(String::from),
            ) else {
                return Err(Error::Corrupt(
                    "ADD_EDGE record without from/to endpoints".to_string(),
                ));
            };

            // Replacing an edge re-points adjacency on both ends.
            if state
                .store
                .get(&graph)
                .is_some_and(|data| data.edges.contains_key(&edge_id))
            {
                remove_edge(state, &graph, &edge_id);
            }

            for (field, value) in &attrs {
                if !STRUCTURAL_FIELDS.contains(&field.as_str()) {
                    index_insert(&mut state.edge_index, &graph, field, &edge_id, value);
                }
            }
            state
                .store
                .entry(graph.clone())
                .or_default()
                .edges
                .insert(edge_id.clone(), attrs);

            let adjacency = state.adjacency.entry(graph).or_default();
            adjacency
                .entry(from)
                .or_default()
                .outgoing
                .insert(edge_id.clone());
            adjacency.entry(to).or_default().incoming.insert(edge_id);
        }

        GraphRecord::DeleteNode { graph, node_id } => {
            let incident: Vec<String> = state
                .adjacency
                .get(&graph)
                .and_then(|nodes| nodes.get(&node_id))
                .map(|adj| adj.outgoing.iter().chain(&adj.incoming).cloned().collect())
                .unwrap_or_default();
            for edge_id in incident {
                remove_edge(&mut *state, &graph, &edge_id);
            }

            if let Some(attrs) = state
                .store
                .get_mut(&graph)
                .and_then(|data| data.nodes.remove(&node_id))
            {
                for (field, value) in &attrs {
                    index_remove(&mut state.node_index, &graph, field, &node_id, value);
                }
            }
            if let Some(adjacency) = state.adjacency.get_mut(&graph) {
                adjacency.remove(&node_id);
            }
        }

        GraphRecord::DeleteEdge { graph, edge_id } => {
            remove_edge(state, &graph, &edge_id);
        }
    }
    Ok(())
}

impl StorageEngine for GraphEngine {
    fn startup(&self) -> Result<()> {
        GraphEngine::startup(self)
    }

    fn shutdown(&self) -> Result<()> {
        GraphEngine::shutdown(self)
    }

    /// The payload is a JSON-encoded attribute object.
    fn put(&self, scope: &str, key: &str, payload: Value) -> Result<()> {
        let attrs = decode_object_payload("node", &payload)?;
        self.add_node(scope, key, Value::Object(attrs))
    }

    fn get(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        self.get_node(scope, key)
    }

    fn delete(&self, scope: &str, key: &str) -> Result<bool> {
        self.delete_node(scope, key)
    }

    fn query(&self, scope: &str, shape: &Value) -> Result<Vec<Value>> {
        GraphEngine::query(self, scope, shape)
    }
}

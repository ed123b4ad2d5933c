//! # Context Graph
//!
//! Directed graph of content references, used to answer "what can this key
//! holder see from here?".
//!
//! ## Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            CONTEXT GRAPH                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   node = content_hash         state: Public | Encrypted | Decrypted    │
//! │                                      (Unknown when only referenced)    │
//! │                                                                         │
//! │   ┌──────┐  public  (h2, "ops")   ┌──────┐                             │
//! │   │  h1  │ ─────────────────────► │  h2  │                             │
//! │   └──────┘                         └──────┘                             │
//! │       │     private (h3, "board")  ┌──────┐                             │
//! │       └──────────────────────────► │  h3  │   only after h1 decrypted  │
//! │                                    └──────┘                             │
//! │                                                                         │
//! │   accessible_from(h1, {"ops"}):                                        │
//! │     h1 always; h2 iff "ops" held and h2 Public/Decrypted;              │
//! │     never expands past an excluded node                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The graph holds no content and never deletes. Replaying the same
//! envelopes rebuilds the same graph.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::envelope::{ContextReference, CoreMessage, EncryptionMode, Envelope};

/// What the local holder knows about a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Referenced, but no envelope for it has been seen
    Unknown,
    /// Seen, still ciphertext to us
    Encrypted,
    /// Seen and decrypted
    Decrypted,
    /// Plaintext envelope
    Public,
}

impl NodeState {
    fn is_readable(self) -> bool {
        matches!(self, NodeState::Public | NodeState::Decrypted)
    }

    /// Later knowledge only ever upgrades a node
    fn merge(self, other: NodeState) -> NodeState {
        use NodeState::*;
        match (self, other) {
            (Public, _) | (_, Public) => Public,
            (Decrypted, _) | (_, Decrypted) => Decrypted,
            (Encrypted, _) | (_, Encrypted) => Encrypted,
            _ => Unknown,
        }
    }
}

/// Where an edge was learned from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// From the envelope's `public_references`
    Public,
    /// From a decrypted message's `context_references`
    Private,
}

/// A reference from one node to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Referenced content hash
    #[serde(with = "hex::serde")]
    pub target: Vec<u8>,
    /// Access group of the referenced content
    pub group_id: String,
    /// Public or private reference
    pub visibility: Visibility,
}

/// A node that was reached but cannot be read with the held groups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpaqueNode {
    /// Hash of the unreadable content
    #[serde(with = "hex::serde")]
    pub content_hash: Vec<u8>,
    /// Group whose key would be needed
    pub group_id: String,
}

/// Result of a disclosure query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disclosure {
    /// Readable nodes, root included
    pub accessible: HashSet<Vec<u8>>,
    /// Frontier nodes that exist but stay closed, sorted
    pub opaque: Vec<OpaqueNode>,
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<Vec<u8>, NodeState>,
    edges: HashMap<Vec<u8>, Vec<Edge>>,
    edge_count: usize,
}

impl GraphInner {
    fn upsert_node(&mut self, hash: &[u8], state: NodeState) -> NodeState {
        let entry = self.nodes.entry(hash.to_vec()).or_insert(NodeState::Unknown);
        *entry = entry.merge(state);
        *entry
    }

    fn add_edge(&mut self, source: &[u8], reference: &ContextReference, visibility: Visibility) {
        self.upsert_node(&reference.content_hash, NodeState::Unknown);
        let edges = self.edges.entry(source.to_vec()).or_default();
        if let Some(existing) = edges
            .iter_mut()
            .find(|e| e.target == reference.content_hash && e.group_id == reference.group_id)
        {
            if visibility == Visibility::Public {
                existing.visibility = Visibility::Public;
            }
            return;
        }
        edges.push(Edge {
            target: reference.content_hash.clone(),
            group_id: reference.group_id.clone(),
            visibility,
        });
        self.edge_count += 1;
    }
}

/// Reference graph over content hashes
///
/// Readers share a `parking_lot::RwLock`; registration takes it exclusively.
#[derive(Debug, Default)]
pub struct ContextGraph {
    inner: RwLock<GraphInner>,
}

impl ContextGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from envelopes (and whatever plaintexts are known)
    pub fn replay<'a, I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = (&'a Envelope, Option<&'a CoreMessage>)>,
    {
        let graph = Self::new();
        for (envelope, message) in envelopes {
            graph.add_envelope(envelope, message);
        }
        graph
    }

    /// Register an envelope, its public references, and (when the
    /// decrypted message is supplied) its private references
    ///
    /// Multi-part slices are skipped; register the reassembled envelope.
    pub fn add_envelope(&self, envelope: &Envelope, message: Option<&CoreMessage>) {
        if envelope.is_multipart() {
            tracing::debug!(
                content_hash = %envelope.content_hash_hex(),
                "Skipping multi-part slice in context graph"
            );
            return;
        }

        let state = match (envelope.encryption, message) {
            (EncryptionMode::None, _) => NodeState::Public,
            (_, Some(_)) => NodeState::Decrypted,
            (_, None) => NodeState::Encrypted,
        };

        let mut inner = self.inner.write();
        let source = envelope.content_hash.as_slice();
        inner.upsert_node(source, state);
        for reference in &envelope.public_references {
            inner.add_edge(source, reference, Visibility::Public);
        }
        if let Some(message) = message {
            for reference in &message.context_references {
                inner.add_edge(source, reference, Visibility::Private);
            }
        }

        tracing::debug!(
            content_hash = %envelope.content_hash_hex(),
            ?state,
            nodes = inner.nodes.len(),
            edges = inner.edge_count,
            "Registered envelope in context graph"
        );
    }

    /// Record that a node's content has been decrypted
    ///
    /// Returns `true` if the node's state changed.
    pub fn mark_decrypted(&self, content_hash: &[u8]) -> bool {
        let mut inner = self.inner.write();
        let before = inner.nodes.get(content_hash).copied();
        let after = inner.upsert_node(content_hash, NodeState::Decrypted);
        before != Some(after)
    }

    /// Nodes readable from `root` with the groups in `held`
    pub fn accessible_from(&self, root: &[u8], held: &HashSet<String>) -> HashSet<Vec<u8>> {
        self.traverse(root, held, None).accessible
    }

    /// Like [`accessible_from`](Self::accessible_from) but no further than
    /// `max_depth` edges from `root`
    pub fn accessible_within(
        &self,
        root: &[u8],
        held: &HashSet<String>,
        max_depth: usize,
    ) -> HashSet<Vec<u8>> {
        self.traverse(root, held, Some(max_depth)).accessible
    }

    /// Readable nodes plus the opaque frontier around them
    pub fn disclose(&self, root: &[u8], held: &HashSet<String>) -> Disclosure {
        self.traverse(root, held, None)
    }

    fn traverse(&self, root: &[u8], held: &HashSet<String>, max_depth: Option<usize>) -> Disclosure {
        let inner = self.inner.read();

        let mut accessible: HashSet<Vec<u8>> = HashSet::new();
        let mut opaque: HashSet<OpaqueNode> = HashSet::new();
        let mut queue: VecDeque<(Vec<u8>, usize)> = VecDeque::new();

        accessible.insert(root.to_vec());
        queue.push_back((root.to_vec(), 0));

        while let Some((node, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            let Some(edges) = inner.edges.get(&node) else {
                continue;
            };
            for edge in edges {
                if accessible.contains(&edge.target) {
                    continue;
                }
                let readable = inner
                    .nodes
                    .get(&edge.target)
                    .is_some_and(|state| state.is_readable());
                if held.contains(&edge.group_id) && readable {
                    accessible.insert(edge.target.clone());
                    queue.push_back((edge.target.clone(), depth + 1));
                } else {
                    opaque.insert(OpaqueNode {
                        content_hash: edge.target.clone(),
                        group_id: edge.group_id.clone(),
                    });
                }
            }
        }

        // Reachable by another path counts as accessible
        let mut opaque: Vec<OpaqueNode> = opaque
            .into_iter()
            .filter(|o| !accessible.contains(&o.content_hash))
            .collect();
        opaque.sort();

        Disclosure { accessible, opaque }
    }

    /// State of a node, if known
    pub fn node_state(&self, content_hash: &[u8]) -> Option<NodeState> {
        self.inner.read().nodes.get(content_hash).copied()
    }

    /// Outgoing edges of a node
    pub fn edges_from(&self, content_hash: &[u8]) -> Vec<Edge> {
        self.inner
            .read()
            .edges
            .get(content_hash)
            .cloned()
            .unwrap_or_default()
    }

    /// True if the hash is a node (seen or referenced)
    pub fn contains(&self, content_hash: &[u8]) -> bool {
        self.inner.read().nodes.contains_key(content_hash)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Number of distinct edges
    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageType, Metadata};

    fn h(n: u8) -> Vec<u8> {
        vec![n; 32]
    }

    fn envelope(hash: Vec<u8>, encryption: EncryptionMode, public: Vec<ContextReference>) -> Envelope {
        Envelope {
            version: 1,
            content_hash: hash,
            message_type: MessageType::CoreMessage,
            encryption,
            reply_to: None,
            public_references: public,
            access_grants: Vec::new(),
            message: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    fn held(groups: &[&str]) -> HashSet<String> {
        groups.iter().map(|g| g.to_string()).collect()
    }

    #[test]
    fn test_root_with_only_private_refs() {
        let graph = ContextGraph::new();
        let message = CoreMessage::new("x").with_reference(ContextReference::new(h(2), "board"));
        graph.add_envelope(&envelope(h(1), EncryptionMode::Protected, vec![]), Some(&message));
        graph.add_envelope(&envelope(h(2), EncryptionMode::Protected, vec![]), None);

        let reached = graph.accessible_from(&h(1), &HashSet::new());
        assert_eq!(reached, [h(1)].into_iter().collect());
    }

    #[test]
    fn test_group_and_state_both_required() {
        let graph = ContextGraph::new();
        graph.add_envelope(
            &envelope(
                h(1),
                EncryptionMode::None,
                vec![ContextReference::new(h(2), "ops"), ContextReference::new(h(3), "ops")],
            ),
            None,
        );
        graph.add_envelope(&envelope(h(2), EncryptionMode::None, vec![]), None);
        graph.add_envelope(&envelope(h(3), EncryptionMode::Protected, vec![]), None);

        let reached = graph.accessible_from(&h(1), &held(&["ops"]));
        assert!(reached.contains(&h(2)));
        assert!(!reached.contains(&h(3)));

        assert!(graph.mark_decrypted(&h(3)));
        assert!(!graph.mark_decrypted(&h(3)));
        assert!(graph.accessible_from(&h(1), &held(&["ops"])).contains(&h(3)));
    }

    #[test]
    fn test_no_expansion_past_excluded_node() {
        let graph = ContextGraph::new();
        graph.add_envelope(
            &envelope(h(1), EncryptionMode::None, vec![ContextReference::new(h(2), "a")]),
            None,
        );
        graph.add_envelope(
            &envelope(h(2), EncryptionMode::None, vec![ContextReference::new(h(3), "b")]),
            None,
        );
        graph.add_envelope(&envelope(h(3), EncryptionMode::None, vec![]), None);

        // Holding "b" alone cannot reach h3 through h2
        let reached = graph.accessible_from(&h(1), &held(&["b"]));
        assert_eq!(reached.len(), 1);

        let all = graph.accessible_from(&h(1), &held(&["a", "b"]));
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_disclose_reports_opaque_frontier() {
        let graph = ContextGraph::new();
        graph.add_envelope(
            &envelope(
                h(1),
                EncryptionMode::None,
                vec![ContextReference::new(h(2), "open"), ContextReference::new(h(9), "secret")],
            ),
            None,
        );
        graph.add_envelope(&envelope(h(2), EncryptionMode::None, vec![]), None);

        let disclosure = graph.disclose(&h(1), &held(&["open"]));
        assert_eq!(disclosure.accessible.len(), 2);
        assert_eq!(
            disclosure.opaque,
            vec![OpaqueNode { content_hash: h(9), group_id: "secret".into() }]
        );
        // Referenced but never seen
        assert_eq!(graph.node_state(&h(9)), Some(NodeState::Unknown));
    }

    #[test]
    fn test_depth_limit() {
        let graph = ContextGraph::new();
        for n in 1..5u8 {
            graph.add_envelope(
                &envelope(h(n), EncryptionMode::None, vec![ContextReference::new(h(n + 1), "g")]),
                None,
            );
        }
        graph.add_envelope(&envelope(h(5), EncryptionMode::None, vec![]), None);

        assert_eq!(graph.accessible_within(&h(1), &held(&["g"]), 0).len(), 1);
        assert_eq!(graph.accessible_within(&h(1), &held(&["g"]), 2).len(), 3);
        assert_eq!(graph.accessible_from(&h(1), &held(&["g"])).len(), 5);
    }

    #[test]
    fn test_cycles_terminate() {
        let graph = ContextGraph::new();
        graph.add_envelope(
            &envelope(h(1), EncryptionMode::None, vec![ContextReference::new(h(2), "g")]),
            None,
        );
        graph.add_envelope(
            &envelope(h(2), EncryptionMode::None, vec![ContextReference::new(h(1), "g")]),
            None,
        );
        assert_eq!(graph.accessible_from(&h(1), &held(&["g"])).len(), 2);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let e1 = envelope(h(1), EncryptionMode::None, vec![ContextReference::new(h(2), "g")]);
        let e2 = envelope(h(2), EncryptionMode::Protected, vec![ContextReference::new(h(3), "g")]);
        let m2 = CoreMessage::new("m").with_reference(ContextReference::new(h(4), "g"));

        let a = ContextGraph::replay([(&e1, None), (&e2, Some(&m2))]);
        let b = ContextGraph::replay([(&e1, None), (&e2, Some(&m2)), (&e1, None)]);

        assert_eq!(a.node_count(), b.node_count());
        assert_eq!(a.edge_count(), b.edge_count());
        assert_eq!(a.edge_count(), 3);
        assert_eq!(
            a.disclose(&h(1), &held(&["g"])),
            b.disclose(&h(1), &held(&["g"]))
        );
    }

    #[test]
    fn test_public_edge_wins_over_private() {
        let graph = ContextGraph::new();
        let reference = ContextReference::new(h(2), "g");
        let message = CoreMessage::new("m").with_reference(reference.clone());
        graph.add_envelope(
            &envelope(h(1), EncryptionMode::Protected, vec![reference]),
            Some(&message),
        );
        let edges = graph.edges_from(&h(1));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].visibility, Visibility::Public);
        assert!(graph.contains(&h(2)));
    }
}

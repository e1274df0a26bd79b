/// Route tree compilation: id/path indices and the ranked flat list
///
/// The tree is walked once depth-first. Nodes live in an arena and refer to
/// each other by [`NodeId`], so parent links need no reference counting.
use crate::error::TreeError;
use crate::path::segment::{parse_route_path, Segment, SegmentKind};
use crate::path::matcher::{SPLAT_KEY, STAR_KEY};
use crate::path::{join_paths, trim_path_left, trim_path_right};
use crate::route::rank::{sort_by_rank, RouteScore};
use crate::route::{Route, RouteOptions};
use std::collections::HashMap;
use tracing::debug;

/// Id of the root route
pub const ROOT_ROUTE_ID: &str = "__root__";

/// Index of a node in the tree arena
pub type NodeId = usize;

/// A compiled route
#[derive(Debug)]
pub struct RouteNode {
    pub id: String,
    /// Own path with leading slashes trimmed; `None` for the root and layouts
    pub path: Option<String>,
    pub full_path: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Position in the ranked flat list, if matchable
    pub rank: Option<usize>,
    /// Parsed full path, used for matching
    pub segments: Vec<Segment>,
    /// Param keys introduced by this route's own path
    pub own_param_keys: Vec<String>,
    /// Param keys of the whole full path
    pub full_param_keys: Vec<String>,
    pub options: RouteOptions,
    /// Depth-first declaration order
    pub index: usize,
}

impl RouteNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The route contributes asynchronous work to a load
    pub fn has_lifecycle(&self) -> bool {
        self.options.loader.is_some() || self.options.before_load.is_some()
    }
}

/// The processed route tree
#[derive(Debug)]
pub struct RouteTree {
    nodes: Vec<RouteNode>,
    routes_by_id: HashMap<String, NodeId>,
    routes_by_path: HashMap<String, NodeId>,
    flat_routes: Vec<NodeId>,
}

impl RouteTree {
    /// Compile a root route and all its descendants
    ///
    /// Fails on duplicate route ids and malformed path patterns.
    pub fn build(root: Route) -> Result<Self, TreeError> {
        let mut tree = Self {
            nodes: Vec::new(),
            routes_by_id: HashMap::new(),
            routes_by_path: HashMap::new(),
            flat_routes: Vec::new(),
        };

        tree.insert(root, None)?;

        let scored = tree
            .nodes
            .iter()
            .filter(|node| !node.is_root() && node.path.as_deref().is_some_and(|p| !p.is_empty()))
            .map(|node| (node.index, RouteScore::new(&node.full_path, node.index)))
            .collect();
        tree.flat_routes = sort_by_rank(scored);

        for (rank, &node_id) in tree.flat_routes.iter().enumerate() {
            tree.nodes[node_id].rank = Some(rank);
        }

        debug!(
            routes = tree.nodes.len(),
            matchable = tree.flat_routes.len(),
            "Processed route tree"
        );

        Ok(tree)
    }

    fn insert(&mut self, route: Route, parent: Option<NodeId>) -> Result<NodeId, TreeError> {
        let Route {
            path,
            custom_id,
            children,
            options,
        } = route;

        let is_root = parent.is_none();

        let (id, own_path, full_path) = match parent {
            None => (ROOT_ROUTE_ID.to_string(), None, "/".to_string()),
            Some(parent_id) => {
                let parent_node = &self.nodes[parent_id];

                let own_path = path.map(|p| {
                    if p == "/" {
                        p
                    } else {
                        trim_path_left(&p).to_string()
                    }
                });

                let id_part = custom_id
                    .clone()
                    .or_else(|| own_path.clone())
                    .unwrap_or_default();
                let parent_id_part = if parent_node.is_root() {
                    ""
                } else {
                    parent_node.id.as_str()
                };
                let id = join_paths(["/", parent_id_part, id_part.as_str()]);

                let full_path = match own_path.as_deref() {
                    Some(p) if !p.is_empty() => join_paths([parent_node.full_path.as_str(), p]),
                    _ => parent_node.full_path.clone(),
                };

                (id, own_path, full_path)
            }
        };

        if self.routes_by_id.contains_key(&id) {
            return Err(TreeError::DuplicateRouteId(id));
        }

        let own_segments = match own_path.as_deref() {
            Some(p) => parse_route_path(p)?,
            None => Vec::new(),
        };
        let segments = parse_route_path(&full_path)?;

        let node_id = self.nodes.len();
        self.nodes.push(RouteNode {
            id: id.clone(),
            path: own_path.clone(),
            full_path: full_path.clone(),
            parent,
            children: Vec::new(),
            rank: None,
            own_param_keys: param_keys(&own_segments),
            full_param_keys: param_keys(&segments),
            segments,
            options,
            index: node_id,
        });
        self.routes_by_id.insert(id, node_id);

        if let Some(parent_id) = parent {
            self.nodes[parent_id].children.push(node_id);
        }

        if !is_root && own_path.as_deref().is_some_and(|p| !p.is_empty()) {
            let trimmed = trim_path_right(&full_path).to_string();
            if !self.routes_by_path.contains_key(&trimmed) || full_path.ends_with('/') {
                self.routes_by_path.insert(trimmed, node_id);
            }
        }

        for child in children {
            self.insert(child, Some(node_id))?;
        }

        Ok(node_id)
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn node(&self, id: NodeId) -> &RouteNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RouteNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look a route up by its absolute id
    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.routes_by_id.get(id).copied()
    }

    /// Look a route up by its trimmed full path
    pub fn by_path(&self, path: &str) -> Option<NodeId> {
        self.routes_by_path.get(path).copied()
    }

    /// Matchable routes, most specific first
    pub fn flat_routes(&self) -> &[NodeId] {
        &self.flat_routes
    }

    /// Walk from `id` up to the root
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            current: Some(id),
        }
    }

    /// The chain from the root down to `id`
    pub fn chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain: Vec<NodeId> = self.ancestors(id).collect();
        chain.reverse();
        chain
    }
}

/// Iterator over a node and its ancestors, leaf first
///
/// # Examples
///
/// ```
/// use trailhead_router::{Route, RouteTree};
///
/// let tree = RouteTree::build(
///     Route::root().with_child(Route::new("a").with_child(Route::new("b"))),
/// )
/// .unwrap();
///
/// let leaf = tree.by_id("/a/b").unwrap();
/// let ids: Vec<&str> = tree.ancestors(leaf).map(|n| tree.node(n).id.as_str()).collect();
/// assert_eq!(ids, vec!["/a/b", "/a", "__root__"]);
/// ```
#[derive(Clone)]
pub struct Ancestors<'a> {
    tree: &'a RouteTree,
    current: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.nodes[current].parent;
        Some(current)
    }
}

fn param_keys(segments: &[Segment]) -> Vec<String> {
    let mut keys = Vec::new();
    for segment in segments {
        match segment.kind {
            SegmentKind::Param | SegmentKind::OptionalParam => {
                if let Some(name) = segment.param_name() {
                    keys.push(name.to_string());
                }
            }
            SegmentKind::Wildcard => {
                keys.push(SPLAT_KEY.to_string());
                keys.push(STAR_KEY.to_string());
            }
            SegmentKind::Static => {}
        }
    }
    keys
}

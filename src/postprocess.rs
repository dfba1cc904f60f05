//! Compositing graph applied to rendered frames.
//!
//! Pass-based modalities do not write the combined image; they route an
//! auxiliary buffer through a small node graph that remaps raw values into a
//! storable `[0, 1]` range:
//!
//! ```text
//! depth:  RenderLayers.Depth -> MapRange(clip_start..clip_end -> 0..1) -> Composite
//! normal: RenderLayers.Normal -> SeparateXyz -> MultiplyAdd(0.5, 0.5) x3 -> CombineXyz -> Composite
//! ```
//!
//! Nodes are stored in evaluation order and every link must point forward, so
//! a graph is acyclic by construction once it validates.

use crate::context::RenderedFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("graph has no composite output")]
    NoComposite,
    #[error("graph has more than one composite output")]
    MultipleComposites,
    #[error("link {index} references a missing node or socket")]
    DanglingLink { index: usize },
    #[error("link {index} points backward (from node {from} to node {to})")]
    BackwardLink { index: usize, from: usize, to: usize },
    #[error("input {socket} of node {node} ({kind}) is not connected")]
    UnconnectedInput {
        node: usize,
        socket: usize,
        kind: &'static str,
    },
    #[error("input {socket} of node {node} ({kind}) expects a {expected}")]
    TypeMismatch {
        node: usize,
        socket: usize,
        kind: &'static str,
        expected: &'static str,
    },
    #[error("frame has no {0} pass")]
    MissingPass(&'static str),
    #[error("{0} buffer does not match the frame size")]
    FrameSize(&'static str),
}

/// Compositor node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Source: outputs `0 = Image` (color), `1 = Depth` (scalar), `2 = Normal` (vector)
    RenderLayers,
    /// Linear remap of a scalar
    MapRange {
        from_min: f32,
        from_max: f32,
        to_min: f32,
        to_max: f32,
        clamp: bool,
    },
    /// Vector to three scalars
    SeparateXyz,
    /// `v * multiplier + addend`
    MultiplyAdd { multiplier: f32, addend: f32 },
    /// Three scalars to a vector
    CombineXyz,
    /// Sink: input `0` becomes the output image
    Composite,
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::RenderLayers => "render_layers",
            Node::MapRange { .. } => "map_range",
            Node::SeparateXyz => "separate_xyz",
            Node::MultiplyAdd { .. } => "multiply_add",
            Node::CombineXyz => "combine_xyz",
            Node::Composite => "composite",
        }
    }

    fn inputs(&self) -> usize {
        match self {
            Node::RenderLayers => 0,
            Node::CombineXyz => 3,
            _ => 1,
        }
    }

    fn outputs(&self) -> usize {
        match self {
            Node::RenderLayers | Node::SeparateXyz => 3,
            Node::Composite => 0,
            _ => 1,
        }
    }
}

/// A connection from an output socket to an input socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub from_node: usize,
    pub from_socket: usize,
    pub to_node: usize,
    pub to_socket: usize,
}

impl Link {
    pub fn new(from_node: usize, from_socket: usize, to_node: usize, to_socket: usize) -> Self {
        Self {
            from_node,
            from_socket,
            to_node,
            to_socket,
        }
    }
}

pub const IMAGE_SOCKET: usize = 0;
pub const DEPTH_SOCKET: usize = 1;
pub const NORMAL_SOCKET: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Value {
    Scalar(f32),
    Vector([f32; 3]),
    Color([f32; 4]),
}

/// Result of evaluating a graph: a float image with 1, 3 or 4 channels.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeImage {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl CompositeImage {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Channel values of pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[f32]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        self.data.get(start..start + self.channels)
    }

    /// The frame's combined color buffer, untouched.
    pub fn from_combined(frame: &RenderedFrame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            channels: 4,
            data: frame.combined.clone(),
        }
    }
}

/// A validated-on-demand compositor graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProcessGraph {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl PostProcessGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node, returning its index.
    pub fn add(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn link(&mut self, from_node: usize, from_socket: usize, to_node: usize, to_socket: usize) {
        self.links
            .push(Link::new(from_node, from_socket, to_node, to_socket));
    }

    /// Check structure: exactly one composite, forward links to existing
    /// sockets, and every input connected.
    pub fn validate(&self) -> Result<(), GraphError> {
        let composites = self
            .nodes
            .iter()
            .filter(|n| matches!(n, Node::Composite))
            .count();
        match composites {
            0 => return Err(GraphError::NoComposite),
            1 => {}
            _ => return Err(GraphError::MultipleComposites),
        }

        for (index, link) in self.links.iter().enumerate() {
            let (Some(from), Some(to)) = (self.nodes.get(link.from_node), self.nodes.get(link.to_node))
            else {
                return Err(GraphError::DanglingLink { index });
            };
            if link.from_socket >= from.outputs() || link.to_socket >= to.inputs() {
                return Err(GraphError::DanglingLink { index });
            }
            if link.from_node >= link.to_node {
                return Err(GraphError::BackwardLink {
                    index,
                    from: link.from_node,
                    to: link.to_node,
                });
            }
        }

        for (node, kind) in self.nodes.iter().enumerate() {
            for socket in 0..kind.inputs() {
                if self.source(node, socket).is_none() {
                    return Err(GraphError::UnconnectedInput {
                        node,
                        socket,
                        kind: kind.kind(),
                    });
                }
            }
        }
        Ok(())
    }

    // Last link into a socket wins, like relinking an input in a node editor.
    fn source(&self, node: usize, socket: usize) -> Option<Link> {
        self.links
            .iter()
            .rev()
            .find(|l| l.to_node == node && l.to_socket == socket)
            .copied()
    }

    fn uses_socket(&self, socket: usize) -> bool {
        self.links.iter().any(|l| {
            l.from_socket == socket && matches!(self.nodes.get(l.from_node), Some(Node::RenderLayers))
        })
    }

    /// Auxiliary passes the graph reads.
    pub fn required_passes(&self) -> (bool, bool) {
        (self.uses_socket(DEPTH_SOCKET), self.uses_socket(NORMAL_SOCKET))
    }

    /// Evaluate the graph for every pixel of `frame`.
    pub fn evaluate(&self, frame: &RenderedFrame) -> Result<CompositeImage, GraphError> {
        self.validate()?;
        let (needs_depth, needs_normal) = self.required_passes();
        let depth = match (&frame.depth, needs_depth) {
            (None, true) => return Err(GraphError::MissingPass("depth")),
            (d, _) => d.as_deref(),
        };
        let normal = match (&frame.normal, needs_normal) {
            (None, true) => return Err(GraphError::MissingPass("normal")),
            (n, _) => n.as_deref(),
        };

        let pixels = frame.pixel_count();
        if frame.combined.len() != pixels * 4 {
            return Err(GraphError::FrameSize("combined"));
        }
        if depth.is_some_and(|d| d.len() != pixels) {
            return Err(GraphError::FrameSize("depth"));
        }
        if normal.is_some_and(|n| n.len() != pixels * 3) {
            return Err(GraphError::FrameSize("normal"));
        }

        // Resolve each input once instead of scanning links per pixel.
        let wiring: Vec<Vec<Link>> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                (0..node.inputs())
                    .filter_map(|s| self.source(i, s))
                    .collect()
            })
            .collect();

        let mut channels = None;
        let mut data = Vec::new();
        let mut outputs: Vec<[Option<Value>; 3]> = vec![[None; 3]; self.nodes.len()];

        for p in 0..pixels {
            for (i, node) in self.nodes.iter().enumerate() {
                let input = |s: usize| -> Option<Value> {
                    let link = wiring[i].get(s)?;
                    outputs[link.from_node][link.from_socket]
                };
                let result: [Option<Value>; 3] = match node {
                    Node::RenderLayers => {
                        let c = &frame.combined[p * 4..p * 4 + 4];
                        let d = depth.map(|d| d[p]).unwrap_or(f32::INFINITY);
                        let n = normal
                            .map(|n| [n[p * 3], n[p * 3 + 1], n[p * 3 + 2]])
                            .unwrap_or([0.0; 3]);
                        [
                            Some(Value::Color([c[0], c[1], c[2], c[3]])),
                            Some(Value::Scalar(d)),
                            Some(Value::Vector(n)),
                        ]
                    }
                    Node::MapRange {
                        from_min,
                        from_max,
                        to_min,
                        to_max,
                        clamp,
                    } => {
                        let v = scalar(input(0), i, 0, node)?;
                        let span = from_max - from_min;
                        let t = if span.abs() > f32::EPSILON {
                            (v - from_min) / span
                        } else {
                            0.0
                        };
                        let mut out = to_min + t * (to_max - to_min);
                        if *clamp {
                            out = out.clamp(to_min.min(*to_max), to_min.max(*to_max));
                        }
                        [Some(Value::Scalar(out)), None, None]
                    }
                    Node::SeparateXyz => {
                        let v = vector(input(0), i, node)?;
                        [
                            Some(Value::Scalar(v[0])),
                            Some(Value::Scalar(v[1])),
                            Some(Value::Scalar(v[2])),
                        ]
                    }
                    Node::MultiplyAdd { multiplier, addend } => {
                        let v = scalar(input(0), i, 0, node)?;
                        [Some(Value::Scalar(v * multiplier + addend)), None, None]
                    }
                    Node::CombineXyz => {
                        let x = scalar(input(0), i, 0, node)?;
                        let y = scalar(input(1), i, 1, node)?;
                        let z = scalar(input(2), i, 2, node)?;
                        [Some(Value::Vector([x, y, z])), None, None]
                    }
                    Node::Composite => {
                        match input(0) {
                            Some(Value::Scalar(v)) => {
                                channels.get_or_insert(1);
                                data.push(v);
                            }
                            Some(Value::Vector(v)) => {
                                channels.get_or_insert(3);
                                data.extend_from_slice(&v);
                            }
                            Some(Value::Color(v)) => {
                                channels.get_or_insert(4);
                                data.extend_from_slice(&v);
                            }
                            None => {
                                return Err(GraphError::UnconnectedInput {
                                    node: i,
                                    socket: 0,
                                    kind: node.kind(),
                                })
                            }
                        }
                        [None, None, None]
                    }
                };
                outputs[i] = result;
            }
        }

        Ok(CompositeImage {
            width: frame.width,
            height: frame.height,
            channels: channels.unwrap_or(4),
            data,
        })
    }
}

fn scalar(value: Option<Value>, node: usize, socket: usize, kind: &Node) -> Result<f32, GraphError> {
    match value {
        Some(Value::Scalar(v)) => Ok(v),
        _ => Err(GraphError::TypeMismatch {
            node,
            socket,
            kind: kind.kind(),
            expected: "scalar",
        }),
    }
}

fn vector(value: Option<Value>, node: usize, kind: &Node) -> Result<[f32; 3], GraphError> {
    match value {
        Some(Value::Vector(v)) => Ok(v),
        _ => Err(GraphError::TypeMismatch {
            node,
            socket: 0,
            kind: kind.kind(),
            expected: "vector",
        }),
    }
}

/// Depth remap: `[clip_start, clip_end] -> [0, 1]`, near black, far and
/// background white.
pub fn depth_graph(clip_start: f64, clip_end: f64) -> PostProcessGraph {
    let mut graph = PostProcessGraph::new();
    let layers = graph.add(Node::RenderLayers);
    let remap = graph.add(Node::MapRange {
        from_min: clip_start as f32,
        from_max: clip_end as f32,
        to_min: 0.0,
        to_max: 1.0,
        clamp: true,
    });
    let composite = graph.add(Node::Composite);
    graph.link(layers, DEPTH_SOCKET, remap, 0);
    graph.link(remap, 0, composite, 0);
    graph
}

/// Normal remap: each channel `v * 0.5 + 0.5`.
pub fn normal_graph() -> PostProcessGraph {
    let mut graph = PostProcessGraph::new();
    let layers = graph.add(Node::RenderLayers);
    let separate = graph.add(Node::SeparateXyz);
    graph.link(layers, NORMAL_SOCKET, separate, 0);
    let channels: Vec<usize> = (0..3)
        .map(|axis| {
            let remap = graph.add(Node::MultiplyAdd {
                multiplier: 0.5,
                addend: 0.5,
            });
            graph.link(separate, axis, remap, 0);
            remap
        })
        .collect();
    let combine = graph.add(Node::CombineXyz);
    for (axis, remap) in channels.into_iter().enumerate() {
        graph.link(remap, 0, combine, axis);
    }
    let composite = graph.add(Node::Composite);
    graph.link(combine, 0, composite, 0);
    graph
}

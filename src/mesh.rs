//! Labeled mesh loading.
//!
//! Scans come as a Wavefront OBJ plus a JSON file with one integer label per
//! vertex. Only positions and faces are read, and vertex order is kept exactly
//! as written so that label `i` stays attached to vertex `i`.

use bevy::prelude::Vec3;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Material slot of background and gum polygons.
pub const GUM_SLOT: u8 = 0;
/// Material slot of tooth polygons.
pub const TOOTH_SLOT: u8 = 1;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{name}:{line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },
    #[error("invalid label file {path}: {source}")]
    Labels {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{labels} labels for {vertices} vertices")]
    LabelCount { labels: usize, vertices: usize },
}

/// A face with its material slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polygon {
    /// Zero-based vertex indices
    pub vertices: Vec<u32>,
    pub material_slot: u8,
}

/// Polygon mesh with per-polygon material slots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<Polygon>,
}

/// Per-vertex class labels: 0 for gum, positive for teeth.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLabels {
    pub labels: Vec<i64>,
}

/// Result of class assignment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub gum: usize,
    pub tooth: usize,
    /// Polygons whose vertices disagree; their slot is left as it was
    pub mixed: usize,
}

impl VertexLabels {
    pub fn load(path: &Path) -> Result<Self, MeshError> {
        let text = fs::read_to_string(path).map_err(|source| MeshError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| MeshError::Labels {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Mesh {
    /// Load an OBJ file. The mesh is named after the file stem.
    pub fn load_obj(path: &Path) -> Result<Self, MeshError> {
        let text = fs::read_to_string(path).map_err(|source| MeshError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mesh = Self::parse_obj(&name, &text)?;
        debug!(
            "Loaded {} ({} vertices, {} polygons)",
            path.display(),
            mesh.vertices.len(),
            mesh.polygons.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ text. Every polygon starts in the gum slot.
    pub fn parse_obj(name: &str, text: &str) -> Result<Self, MeshError> {
        let mut mesh = Mesh {
            name: name.to_string(),
            ..Default::default()
        };
        let error = |line: usize, message: String| MeshError::Parse {
            name: name.to_string(),
            line,
            message,
        };

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("v") => {
                    let coords: Vec<f32> = fields
                        .take(3)
                        .map(|f| f.parse::<f32>())
                        .collect::<Result<_, _>>()
                        .map_err(|e| error(line_no, format!("bad vertex: {}", e)))?;
                    if coords.len() != 3 {
                        return Err(error(line_no, "vertex needs three coordinates".into()));
                    }
                    mesh.vertices.push(Vec3::new(coords[0], coords[1], coords[2]));
                }
                Some("f") => {
                    let count = mesh.vertices.len() as i64;
                    let mut vertices = Vec::new();
                    for field in fields {
                        // v, v/vt, v//vn or v/vt/vn
                        let index_text = field.split('/').next().unwrap_or("");
                        let index: i64 = index_text
                            .parse()
                            .map_err(|_| error(line_no, format!("bad face index '{}'", field)))?;
                        let resolved = if index < 0 { count + index } else { index - 1 };
                        if index == 0 || resolved < 0 || resolved >= count {
                            return Err(error(
                                line_no,
                                format!("face index {} out of range (1..={})", index, count),
                            ));
                        }
                        vertices.push(resolved as u32);
                    }
                    if vertices.len() < 3 {
                        return Err(error(line_no, "face needs at least three vertices".into()));
                    }
                    mesh.polygons.push(Polygon {
                        vertices,
                        material_slot: GUM_SLOT,
                    });
                }
                _ => {}
            }
        }
        Ok(mesh)
    }

    /// Put every polygon whose vertices all share a class into that class's
    /// slot. Mixed polygons keep their current slot.
    pub fn assign_polygon_classes(&mut self, labels: &VertexLabels) -> Result<ClassCounts, MeshError> {
        if labels.len() < self.vertices.len() {
            return Err(MeshError::LabelCount {
                labels: labels.len(),
                vertices: self.vertices.len(),
            });
        }

        let mut counts = ClassCounts::default();
        for polygon in &mut self.polygons {
            let class = |v: &u32| labels.labels.get(*v as usize).copied().unwrap_or(-1);
            if polygon.vertices.iter().all(|v| class(v) == 0) {
                polygon.material_slot = GUM_SLOT;
                counts.gum += 1;
            } else if polygon.vertices.iter().all(|v| class(v) > 0) {
                polygon.material_slot = TOOTH_SLOT;
                counts.tooth += 1;
            } else {
                counts.mixed += 1;
            }
        }
        debug!(
            "{}: {} gum, {} tooth, {} mixed polygons",
            self.name, counts.gum, counts.tooth, counts.mixed
        );
        Ok(counts)
    }

    /// Axis-aligned bounds, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
        )
    }

    /// Fan triangulation of every polygon, with the polygon's slot.
    pub fn triangles(&self) -> impl Iterator<Item = ([u32; 3], u8)> + '_ {
        self.polygons.iter().flat_map(|p| {
            (1..p.vertices.len().saturating_sub(1))
                .map(move |i| ([p.vertices[0], p.vertices[i], p.vertices[i + 1]], p.material_slot))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const QUADS: &str = "\
# two quads sharing an edge
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 2 0 0
v 2 1 0
f 1 2 3 4
f 2/1 5/2 6/3 3/4
";

    #[test]
    fn test_parse_obj() {
        let mesh = Mesh::parse_obj("quads", QUADS).unwrap();
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.polygons.len(), 2);
        assert_eq!(mesh.polygons[1].vertices, vec![1, 4, 5, 2]);
        assert!(mesh.polygons.iter().all(|p| p.material_slot == GUM_SLOT));
        assert_eq!(mesh.triangles().count(), 4);
    }

    #[test]
    fn test_negative_indices() {
        let mesh = Mesh::parse_obj("tri", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n").unwrap();
        assert_eq!(mesh.polygons[0].vertices, vec![0, 1, 2]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Mesh::parse_obj("bad", "v 0 0\n"),
            Err(MeshError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            Mesh::parse_obj("bad", "v 0 0 0\nf 1 2 3\n"),
            Err(MeshError::Parse { line: 2, .. })
        ));
        assert!(Mesh::parse_obj("bad", "v 0 0 0\nf 1 1\n").is_err());
    }

    #[test]
    fn test_class_assignment() {
        let mut mesh = Mesh::parse_obj("quads", QUADS).unwrap();
        mesh.polygons.push(Polygon {
            vertices: vec![4, 5, 2],
            material_slot: GUM_SLOT,
        });
        // only vertices 4 and 5 are tooth
        let labels = VertexLabels {
            labels: vec![0, 0, 0, 0, 11, 12],
        };
        let counts = mesh.assign_polygon_classes(&labels).unwrap();
        assert_eq!(counts, ClassCounts { gum: 1, tooth: 0, mixed: 2 });
        assert_eq!(mesh.polygons[0].material_slot, GUM_SLOT);
        assert_eq!(mesh.polygons[1].material_slot, GUM_SLOT);

        let all_tooth = VertexLabels { labels: vec![3; 6] };
        let counts = mesh.assign_polygon_classes(&all_tooth).unwrap();
        assert_eq!(counts.tooth, 3);
        assert!(mesh.polygons.iter().all(|p| p.material_slot == TOOTH_SLOT));

        // mixed polygons keep whatever was last written
        let mixed = VertexLabels {
            labels: vec![0, 5, 0, 5, 0, 5],
        };
        let counts = mesh.assign_polygon_classes(&mixed).unwrap();
        assert_eq!(counts.mixed, 3);
        assert!(mesh.polygons.iter().all(|p| p.material_slot == TOOTH_SLOT));
    }

    #[test]
    fn test_too_few_labels() {
        let mut mesh = Mesh::parse_obj("quads", QUADS).unwrap();
        let err = mesh.assign_polygon_classes(&VertexLabels { labels: vec![0; 3] });
        assert!(matches!(err, Err(MeshError::LabelCount { labels: 3, vertices: 6 })));
    }

    #[test]
    fn test_load_files() {
        let dir = TempDir::new().unwrap();
        let obj = dir.path().join("case.obj");
        let json = dir.path().join("case.json");
        fs::write(&obj, QUADS).unwrap();
        fs::write(&json, r#"{"labels": [0, 0, 0, 0, 1, 1], "jaw": "upper"}"#).unwrap();

        let mesh = Mesh::load_obj(&obj).unwrap();
        assert_eq!(mesh.name, "case");
        let labels = VertexLabels::load(&json).unwrap();
        assert_eq!(labels.len(), 6);

        fs::write(&json, "{not json").unwrap();
        assert!(matches!(VertexLabels::load(&json), Err(MeshError::Labels { .. })));
        assert!(matches!(
            Mesh::load_obj(&dir.path().join("missing.obj")),
            Err(MeshError::Io { .. })
        ));
    }

    #[test]
    fn test_bounds() {
        let mesh = Mesh::parse_obj("quads", QUADS).unwrap();
        let (lo, hi) = mesh.bounds().unwrap();
        assert_eq!(lo, Vec3::ZERO);
        assert_eq!(hi, Vec3::new(2.0, 1.0, 0.0));
        assert!(Mesh::default().bounds().is_none());
    }
}

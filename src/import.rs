use std::path::{Path, PathBuf};

use thiserror::Error as ThisError;
use tracing::debug;

use crate::utilities::mathematics::{Vector2, Vector3};

mod esm;
mod esx;

pub use esx::load_shape_keys;

pub const SUPPORTED_FILES: [&str; 1] = ["esm"];

/// The most weights a vertex may carry into the compiled format.
pub const MAX_VERTEX_WEIGHTS: usize = 4;

/// In-memory representation of one authored mesh with its skeleton.
#[derive(Debug, Default)]
pub struct SourceMesh {
    /// The part name the compile script assigned to this mesh.
    pub name: String,
    /// One group per material, each an implicit triangle list.
    pub groups: Vec<MaterialGroup>,
    /// Flat bone list with parent links.
    pub bones: Vec<SourceBone>,
}

impl SourceMesh {
    /// Case-insensitive bone lookup, returns the bone index.
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name.eq_ignore_ascii_case(name))
    }

    pub fn total_vertices(&self) -> usize {
        self.groups.iter().map(|group| group.vertices.len()).sum()
    }
}

#[derive(Debug, Default)]
pub struct MaterialGroup {
    /// The material name used as the lookup key into the session material table.
    pub material: String,
    /// Every three vertices form one triangle.
    pub vertices: Vec<SourceVertex>,
}

#[derive(Clone, Debug, Default)]
pub struct SourceVertex {
    pub position: Vector3,
    pub normal: Vector3,
    pub texcoord: Vector2,
    pub weights: Vec<VertexWeight>,
    /// Stable id used only for shape-key correlation. -1 when the source has none.
    pub vertex_id: i64,
}

#[derive(Clone, Copy, Debug)]
pub struct VertexWeight {
    pub bone: i32,
    pub weight: f32,
}

#[derive(Clone, Debug, Default)]
pub struct SourceBone {
    /// Unique within one mesh.
    pub name: String,
    pub id: i32,
    /// Empty when the bone is a root bone.
    pub parent_name: String,
    /// -1 when the bone is a root bone.
    pub parent_id: i32,
    /// Local position relative to the parent.
    pub position: Vector3,
    /// Local euler rotation relative to the parent.
    pub rotation: Vector3,
}

/// A set of per-vertex delta shapes loaded from a shape-key file.
#[derive(Debug, Default)]
pub struct ShapeKeySet {
    /// The source mesh file the shapes were authored against.
    pub reference: String,
    pub keys: Vec<ShapeKey>,
}

impl ShapeKeySet {
    pub fn find_key(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|key| key.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Default)]
pub struct ShapeKey {
    pub name: String,
    pub vertices: Vec<ShapeVertex>,
}

impl ShapeKey {
    pub fn find_vertex(&self, vertex_id: i64) -> Option<&ShapeVertex> {
        if vertex_id < 0 {
            return None;
        }
        self.vertices.iter().find(|vertex| vertex.vertex_id == vertex_id)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ShapeVertex {
    pub vertex_id: i64,
    pub position: Vector3,
    pub normal: Vector3,
}

#[derive(Debug, ThisError)]
pub enum ImportError {
    #[error("File \"{0}\" Does Not Exist")]
    NotFound(PathBuf),
    #[error("Failed To Read File: {0}")]
    FailedFileRead(#[from] std::io::Error),
    #[error("File Does Not Have Extension")]
    FileDoesNotHaveExtension,
    #[error("File Format Is Not Supported")]
    UnsupportedFileFormat,
    #[error("Group \"{material}\" Has {count} Vertices, Not Divisible Into Triangles")]
    InvalidTriangleCount { material: String, count: usize },
    #[error("Line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Loads a source mesh from a supported text format.
///
/// A triangle count not divisible by three is caught here, before the
/// mesh can enter the pipeline.
pub fn load_mesh(path: &Path) -> Result<SourceMesh, ImportError> {
    if !path.is_file() {
        return Err(ImportError::NotFound(path.to_path_buf()));
    }

    let extension = path.extension().ok_or(ImportError::FileDoesNotHaveExtension)?;
    let contents = std::fs::read_to_string(path)?;

    let mesh = match extension.to_string_lossy().to_lowercase().as_str() {
        "esm" => esm::parse_mesh(&contents)?,
        _ => return Err(ImportError::UnsupportedFileFormat),
    };

    for group in &mesh.groups {
        if group.vertices.len() % 3 != 0 {
            return Err(ImportError::InvalidTriangleCount {
                material: group.material.clone(),
                count: group.vertices.len(),
            });
        }
    }

    debug!("Loaded mesh \"{}\" with {} vertices in {} groups.", path.display(), mesh.total_vertices(), mesh.groups.len());

    Ok(mesh)
}

/// Splits a line into whitespace tokens, keeping quoted strings whole.
pub(crate) fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for character in line.chars() {
        match character {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
                in_quotes = !in_quotes;
            }
            character if character.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            character => current.push(character),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Iterates the meaningful lines of a token file, stripping comments.
pub(crate) fn token_lines(contents: &str) -> impl Iterator<Item = (usize, Vec<String>)> + '_ {
    contents.lines().enumerate().filter_map(|(index, line)| {
        let line = line.split("//").next().unwrap_or_default().trim();
        if line.is_empty() {
            return None;
        }
        Some((index + 1, tokenize(line)))
    })
}

fn malformed(line: usize, reason: impl Into<String>) -> ImportError {
    ImportError::Malformed {
        line,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_keeps_quoted_names_whole() {
        let tokens = tokenize("bone 0 \"left arm\" -1 \"\" 0 0 0");
        assert_eq!(tokens, vec!["bone", "0", "left arm", "-1", "", "0", "0", "0"]);
    }

    #[test]
    fn token_lines_skip_comments_and_blanks() {
        let source = "// header\n\nbones\n{\n} // end\n";
        let lines: Vec<_> = token_lines(source).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].1, vec!["bones"]);
        assert_eq!(lines[1].1, vec!["{"]);
        assert_eq!(lines[2].1, vec!["}"]);
    }
}

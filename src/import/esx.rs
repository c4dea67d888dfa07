use std::path::Path;

use tracing::debug;

use super::esm::{parse_number, parse_vector3};
use super::{ImportError, ShapeKey, ShapeKeySet, ShapeVertex, malformed, token_lines};

/// Loads a shape-key file.
///
/// ```text
/// reference "<source mesh file>"
/// key "<name>"
/// {
///     vertex <vertex id> <px py pz> <nx ny nz>
/// }
/// ```
pub fn load_shape_keys(path: &Path) -> Result<ShapeKeySet, ImportError> {
    if !path.is_file() {
        return Err(ImportError::NotFound(path.to_path_buf()));
    }

    let contents = std::fs::read_to_string(path)?;
    let shapes = parse_shape_keys(&contents)?;

    debug!("Loaded {} shape keys referencing \"{}\".", shapes.keys.len(), shapes.reference);

    Ok(shapes)
}

fn parse_shape_keys(contents: &str) -> Result<ShapeKeySet, ImportError> {
    let mut shapes = ShapeKeySet::default();
    let mut lines = token_lines(contents).peekable();

    while let Some((line_number, tokens)) = lines.next() {
        match tokens[0].as_str() {
            "reference" => {
                shapes.reference = tokens.get(1).ok_or_else(|| malformed(line_number, "reference is missing a file name"))?.clone();
            }
            "key" => {
                let name = tokens.get(1).ok_or_else(|| malformed(line_number, "key is missing a name"))?.clone();
                match lines.next() {
                    Some((_, open)) if open[0] == "{" => {}
                    _ => return Err(malformed(line_number, "expected \"{\" after key")),
                }

                let mut key = ShapeKey {
                    name,
                    vertices: Vec::new(),
                };
                while let Some((vertex_line, vertex_tokens)) = lines.next() {
                    if vertex_tokens[0] == "}" {
                        break;
                    }
                    if vertex_tokens[0] != "vertex" || vertex_tokens.len() != 8 {
                        return Err(malformed(vertex_line, "expected: vertex <vertex id> <position> <normal>"));
                    }
                    key.vertices.push(ShapeVertex {
                        vertex_id: parse_number(vertex_line, &vertex_tokens[1])?,
                        position: parse_vector3(vertex_line, &vertex_tokens[2..5])?,
                        normal: parse_vector3(vertex_line, &vertex_tokens[5..8])?,
                    });
                }
                shapes.keys.push(key);
            }
            unknown => return Err(malformed(line_number, format!("unknown directive \"{unknown}\""))),
        }
    }

    if shapes.reference.is_empty() {
        return Err(malformed(0, "shape-key file has no reference mesh"));
    }

    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: &str = r#"
reference "body.esm"
key "damaged"
{
    vertex 4 0 0 1  0 0 1
    vertex 5 2 0 0  1 0 0
}
"#;

    #[test]
    fn parses_reference_and_keys() {
        let shapes = parse_shape_keys(SHAPES).unwrap();
        assert_eq!(shapes.reference, "body.esm");
        assert_eq!(shapes.keys.len(), 1);
        assert_eq!(shapes.keys[0].name, "damaged");
        assert_eq!(shapes.keys[0].vertices.len(), 2);
        assert!(shapes.keys[0].find_vertex(5).is_some());
        assert!(shapes.keys[0].find_vertex(6).is_none());
    }

    #[test]
    fn requires_a_reference() {
        assert!(parse_shape_keys("key \"a\"\n{\n}\n").is_err());
    }
}

use crate::utilities::mathematics::{Vector2, Vector3};

use super::{ImportError, MaterialGroup, SourceBone, SourceMesh, SourceVertex, VertexWeight, malformed, token_lines};

/// Parses the whitespace-token source mesh format.
///
/// ```text
/// bones
/// {
///     bone <id> "<name>" <parent id> "<parent name>" <px py pz> <rx ry rz>
/// }
/// group "<material>"
/// {
///     vertex <px py pz> <nx ny nz> <u v> <count> [<bone> <weight>]... [vertex id]
/// }
/// ```
pub fn parse_mesh(contents: &str) -> Result<SourceMesh, ImportError> {
    let mut mesh = SourceMesh::default();
    let mut lines = token_lines(contents).peekable();

    while let Some((line_number, tokens)) = lines.next() {
        match tokens[0].as_str() {
            "bones" => {
                expect_brace(lines.next(), line_number)?;
                while let Some((bone_line, bone_tokens)) = lines.next() {
                    if bone_tokens[0] == "}" {
                        break;
                    }
                    mesh.bones.push(parse_bone(bone_line, &bone_tokens)?);
                }
            }
            "group" => {
                let material = tokens.get(1).ok_or_else(|| malformed(line_number, "group is missing a material name"))?.clone();
                expect_brace(lines.next(), line_number)?;

                let mut group = MaterialGroup {
                    material,
                    vertices: Vec::new(),
                };
                while let Some((vertex_line, vertex_tokens)) = lines.next() {
                    if vertex_tokens[0] == "}" {
                        break;
                    }
                    group.vertices.push(parse_vertex(vertex_line, &vertex_tokens)?);
                }
                mesh.groups.push(group);
            }
            unknown => return Err(malformed(line_number, format!("unknown directive \"{unknown}\""))),
        }
    }

    Ok(mesh)
}

fn expect_brace(line: Option<(usize, Vec<String>)>, opened_at: usize) -> Result<(), ImportError> {
    match line {
        Some((_, tokens)) if tokens[0] == "{" => Ok(()),
        _ => Err(malformed(opened_at, "expected \"{\" after section")),
    }
}

fn parse_bone(line: usize, tokens: &[String]) -> Result<SourceBone, ImportError> {
    if tokens[0] != "bone" || tokens.len() != 11 {
        return Err(malformed(line, "expected: bone <id> \"<name>\" <parent id> \"<parent name>\" <position> <rotation>"));
    }

    Ok(SourceBone {
        id: parse_number(line, &tokens[1])?,
        name: tokens[2].clone(),
        parent_id: parse_number(line, &tokens[3])?,
        parent_name: tokens[4].clone(),
        position: parse_vector3(line, &tokens[5..8])?,
        rotation: parse_vector3(line, &tokens[8..11])?,
    })
}

fn parse_vertex(line: usize, tokens: &[String]) -> Result<SourceVertex, ImportError> {
    if tokens[0] != "vertex" || tokens.len() < 10 {
        return Err(malformed(line, "expected: vertex <position> <normal> <uv> <count> [<bone> <weight>]..."));
    }

    let weight_count: usize = parse_number(line, &tokens[9])?;
    let weights_end = 10 + weight_count * 2;
    if tokens.len() < weights_end || tokens.len() > weights_end + 1 {
        return Err(malformed(line, format!("vertex declares {weight_count} weights but has {} trailing tokens", tokens.len() - 10)));
    }

    let mut weights = Vec::with_capacity(weight_count);
    for pair in tokens[10..weights_end].chunks_exact(2) {
        weights.push(VertexWeight {
            bone: parse_number(line, &pair[0])?,
            weight: parse_number(line, &pair[1])?,
        });
    }

    let vertex_id = match tokens.get(weights_end) {
        Some(token) => parse_number(line, token)?,
        None => -1,
    };

    Ok(SourceVertex {
        position: parse_vector3(line, &tokens[1..4])?,
        normal: parse_vector3(line, &tokens[4..7])?,
        texcoord: Vector2::new(parse_number(line, &tokens[7])?, parse_number(line, &tokens[8])?),
        weights,
        vertex_id,
    })
}

pub(super) fn parse_vector3(line: usize, tokens: &[String]) -> Result<Vector3, ImportError> {
    Ok(Vector3::new(
        parse_number(line, &tokens[0])?,
        parse_number(line, &tokens[1])?,
        parse_number(line, &tokens[2])?,
    ))
}

pub(super) fn parse_number<T: std::str::FromStr>(line: usize, token: &str) -> Result<T, ImportError> {
    token.parse().map_err(|_| malformed(line, format!("\"{token}\" is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"
// single skinned triangle
bones
{
    bone 0 "root" -1 "" 0 0 0 0 0 0
    bone 1 "spine" 0 "root" 0 0 8 0 0 0
}
group "models/body"
{
    vertex 0 0 0  0 0 1  0 0  1 0 1.0  4
    vertex 1 0 0  0 0 1  1 0  2 0 0.5 1 0.5  5
    vertex 0 1 0  0 0 1  0 1  1 1 1.0
}
"#;

    #[test]
    fn parses_bones_and_groups() {
        let mesh = parse_mesh(TRIANGLE).unwrap();

        assert_eq!(mesh.bones.len(), 2);
        assert_eq!(mesh.bones[1].name, "spine");
        assert_eq!(mesh.bones[1].parent_name, "root");
        assert_eq!(mesh.bones[1].position.z, 8.0);

        assert_eq!(mesh.groups.len(), 1);
        let group = &mesh.groups[0];
        assert_eq!(group.material, "models/body");
        assert_eq!(group.vertices.len(), 3);
        assert_eq!(group.vertices[1].weights.len(), 2);
        assert_eq!(group.vertices[1].vertex_id, 5);
        assert_eq!(group.vertices[2].vertex_id, -1);
        assert_eq!(group.vertices[2].weights[0].bone, 1);
    }

    #[test]
    fn rejects_unknown_directives() {
        let error = parse_mesh("triangles\n{\n}\n").unwrap_err();
        assert!(matches!(error, ImportError::Malformed { line: 1, .. }));
    }

    #[test]
    fn rejects_truncated_vertex() {
        let source = "group \"a\"\n{\nvertex 0 0 0 0 0 1 0 0 2 0 1.0\n}\n";
        assert!(parse_mesh(source).is_err());
    }
}

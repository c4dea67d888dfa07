use std::path::PathBuf;

use thiserror::Error as ThisError;
use tracing::warn;

use crate::import::token_lines;
use crate::utilities::mathematics::Vector3;

/// Everything a compile invocation needs, parsed from one script file.
#[derive(Debug)]
pub struct CompileParams {
    /// The output model file name.
    pub model_filename: PathBuf,
    /// Directory the model references are resolved against, relative to the script.
    pub source_path: Option<PathBuf>,
    /// Uniform scale applied to loaded bones and vertices.
    pub global_scale: Vector3,
    /// Uniform offset applied to loaded vertices and root bones.
    pub global_offset: Vector3,
    pub models: Vec<ModelReference>,
    pub lods: Vec<LodDefinition>,
    pub body_groups: Vec<BodyGroupDefinition>,
    pub material_paths: Vec<String>,
    /// Skips the material tables in the output entirely.
    pub no_materials: bool,
    pub motion_packages: Vec<String>,
    pub attachments: Vec<AttachmentDefinition>,
    pub ik_chains: Vec<IkChainDefinition>,
}

impl Default for CompileParams {
    fn default() -> Self {
        Self {
            model_filename: Default::default(),
            source_path: Default::default(),
            global_scale: Vector3::ONE,
            global_offset: Vector3::ZERO,
            models: Default::default(),
            lods: Default::default(),
            body_groups: Default::default(),
            material_paths: Default::default(),
            no_materials: Default::default(),
            motion_packages: Default::default(),
            attachments: Default::default(),
            ik_chains: Default::default(),
        }
    }
}

/// One `model` entry naming a part and its source file.
#[derive(Debug)]
pub struct ModelReference {
    pub name: String,
    pub source_file: String,
    /// The shape key applied before welding, when the source is a shape-key file.
    pub shape_key: Option<String>,
}

#[derive(Debug)]
pub struct LodDefinition {
    pub distance: f32,
    /// Pairs of (part name, replacement source file).
    pub replacements: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct BodyGroupDefinition {
    pub name: String,
    /// The part name of the model reference this body group selects.
    pub reference: String,
}

#[derive(Debug)]
pub struct AttachmentDefinition {
    pub name: String,
    pub bone: String,
    pub position: Vector3,
    pub rotation: Vector3,
}

#[derive(Debug)]
pub struct IkChainDefinition {
    pub name: String,
    pub effector: String,
    /// Per-link damping overrides by bone name.
    pub damping: Vec<(String, f32)>,
    /// Per-link angular limits by bone name.
    pub limits: Vec<(String, Vector3, Vector3)>,
}

#[derive(Debug, ThisError)]
pub enum ScriptError {
    #[error("No Output Model File Name Specified In The Script (modelfilename)")]
    MissingModelFilename,
    #[error("Script Has No Model References")]
    NoModelReferences,
    #[error("Script Has No Material Paths And Materials Are Not Disabled")]
    NoMaterialPaths,
    #[error("Line {0}: Unclosed Section")]
    UnclosedSection(usize),
}

/// Parses a compile-parameter script.
///
/// Structural problems and missing required keys are fatal. A bad
/// individual attachment, IK sub-key or LOD replacement is logged and
/// skipped so the rest of the script still compiles.
pub fn parse_script(contents: &str) -> Result<CompileParams, ScriptError> {
    let mut params = CompileParams::default();
    let mut lines = token_lines(contents).peekable();

    while let Some((line_number, tokens)) = lines.next() {
        match tokens[0].as_str() {
            "modelfilename" => {
                if let Some(value) = tokens.get(1) {
                    params.model_filename = PathBuf::from(value);
                }
            }
            "source_path" => {
                if let Some(value) = tokens.get(1) {
                    params.source_path = Some(PathBuf::from(value));
                }
            }
            "global_scale" => {
                if let Some(value) = parse_vector(&tokens[1..]) {
                    params.global_scale = value;
                }
            }
            "global_offset" => {
                if let Some(value) = parse_vector(&tokens[1..]) {
                    params.global_offset = value;
                }
            }
            "model" => match (tokens.get(1), tokens.get(2)) {
                (Some(name), Some(file)) => {
                    let shape_key = match (tokens.get(3).map(String::as_str), tokens.get(4)) {
                        (Some("shapeby"), Some(key)) => Some(key.clone()),
                        _ => None,
                    };
                    params.models.push(ModelReference {
                        name: name.clone(),
                        source_file: file.clone(),
                        shape_key,
                    });
                }
                _ => warn!("Line {line_number}: model needs a part name and a source file, skipping."),
            },
            "lod" => {
                let distance = match tokens.get(1).and_then(|token| token.parse().ok()) {
                    Some(distance) => distance,
                    None => {
                        warn!("Line {line_number}: lod needs a numeric distance, defaulting to 1.");
                        1.0
                    }
                };
                let replacements = parse_lod_section(&mut lines, line_number)?;
                params.lods.push(LodDefinition { distance, replacements });
            }
            "bodygroup" => match (tokens.get(1), tokens.get(2)) {
                (Some(name), Some(reference)) => params.body_groups.push(BodyGroupDefinition {
                    name: name.clone(),
                    reference: reference.clone(),
                }),
                _ => warn!("Line {line_number}: bodygroup needs a name and a reference, skipping."),
            },
            "materialpath" => {
                if let Some(path) = tokens.get(1) {
                    let mut path = path.clone();
                    if !path.ends_with('/') && !path.ends_with('\\') {
                        path.push('/');
                    }
                    params.material_paths.push(path);
                }
            }
            "notextures" | "nomaterials" => {
                params.no_materials = tokens.get(1).map(String::as_str) != Some("0");
            }
            "addmotionpackage" => {
                if let Some(package) = tokens.get(1) {
                    params.motion_packages.push(package.clone());
                }
            }
            "attachment" => match parse_attachment(&tokens) {
                Some(attachment) => params.attachments.push(attachment),
                None => warn!("Line {line_number}: invalid attachment definition, skipping. usage: attachment <name> <bone> <position> <rotation>"),
            },
            "ikchain" => match (tokens.get(1), tokens.get(2)) {
                (Some(name), Some(effector)) => {
                    let mut chain = IkChainDefinition {
                        name: name.clone(),
                        effector: effector.clone(),
                        damping: Vec::new(),
                        limits: Vec::new(),
                    };
                    if lines.peek().is_some_and(|(_, tokens)| tokens[0] == "{") {
                        parse_ik_section(&mut lines, line_number, &mut chain)?;
                    }
                    params.ik_chains.push(chain);
                }
                _ => warn!("Line {line_number}: ikchain needs a name and an effector bone, skipping."),
            },
            unknown => warn!("Line {line_number}: unknown script key \"{unknown}\", skipping."),
        }
    }

    if params.model_filename.as_os_str().is_empty() {
        return Err(ScriptError::MissingModelFilename);
    }
    if params.models.is_empty() {
        return Err(ScriptError::NoModelReferences);
    }
    if params.material_paths.is_empty() && !params.no_materials {
        return Err(ScriptError::NoMaterialPaths);
    }

    Ok(params)
}

fn parse_lod_section(lines: &mut std::iter::Peekable<impl Iterator<Item = (usize, Vec<String>)>>, opened_at: usize) -> Result<Vec<(String, String)>, ScriptError> {
    let mut replacements = Vec::new();

    match lines.next() {
        Some((_, tokens)) if tokens[0] == "{" => {}
        _ => return Err(ScriptError::UnclosedSection(opened_at)),
    }

    loop {
        let Some((line_number, tokens)) = lines.next() else {
            return Err(ScriptError::UnclosedSection(opened_at));
        };
        match tokens[0].as_str() {
            "}" => break,
            "replace" => match (tokens.get(1), tokens.get(2)) {
                (Some(name), Some(file)) => replacements.push((name.clone(), file.clone())),
                _ => warn!("Line {line_number}: replace needs a part name and a source file, skipping."),
            },
            unknown => warn!("Line {line_number}: unknown lod key \"{unknown}\", skipping."),
        }
    }

    Ok(replacements)
}

fn parse_ik_section(
    lines: &mut std::iter::Peekable<impl Iterator<Item = (usize, Vec<String>)>>,
    opened_at: usize,
    chain: &mut IkChainDefinition,
) -> Result<(), ScriptError> {
    lines.next();

    loop {
        let Some((line_number, tokens)) = lines.next() else {
            return Err(ScriptError::UnclosedSection(opened_at));
        };
        match tokens[0].as_str() {
            "}" => break,
            "damping" => match (tokens.get(1), tokens.get(2).and_then(|token| token.parse().ok())) {
                (Some(bone), Some(value)) => chain.damping.push((bone.clone(), value)),
                _ => warn!("Line {line_number}: invalid damping, skipping. usage: damping <bone> <value>"),
            },
            "link_limits" => match (
                tokens.get(1),
                parse_vector(tokens.get(2..).unwrap_or_default()),
                parse_vector(tokens.get(5..).unwrap_or_default()),
            ) {
                (Some(bone), Some(mins), Some(maxs)) => chain.limits.push((bone.clone(), mins, maxs)),
                _ => warn!("Line {line_number}: invalid link_limits, skipping. usage: link_limits <bone> <mins> <maxs>"),
            },
            unknown => warn!("Line {line_number}: unknown ikchain key \"{unknown}\", skipping."),
        }
    }

    Ok(())
}

fn parse_attachment(tokens: &[String]) -> Option<AttachmentDefinition> {
    Some(AttachmentDefinition {
        name: tokens.get(1)?.clone(),
        bone: tokens.get(2)?.clone(),
        position: parse_vector(tokens.get(3..)?)?,
        rotation: parse_vector(tokens.get(6..)?)?,
    })
}

fn parse_vector(tokens: &[String]) -> Option<Vector3> {
    Some(Vector3::new(
        tokens.first()?.parse().ok()?,
        tokens.get(1)?.parse().ok()?,
        tokens.get(2)?.parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
modelfilename "soldier.gmf"
source_path "refs"

model "body" "body.esx" shapeby "damaged"
model "head" "head.esm"

lod 250
{
    replace "body" "body_lod1.esm"
}

bodygroup "body" "body"
bodygroup "head" "head"

materialpath "materials/models"
addmotionpackage "soldier_anims"

attachment "muzzle" "r_hand" 0 2 0 0 0 0
attachment "broken" "nowhere"

ikchain "right_leg" "r_foot"
{
    damping "r_knee" 0.5
    link_limits "r_knee" -90 0 0 45 0 0
}
"#;

    #[test]
    fn parses_a_full_script() {
        let params = parse_script(SCRIPT).unwrap();

        assert_eq!(params.model_filename, PathBuf::from("soldier.gmf"));
        assert_eq!(params.source_path, Some(PathBuf::from("refs")));

        assert_eq!(params.models.len(), 2);
        assert_eq!(params.models[0].shape_key.as_deref(), Some("damaged"));
        assert_eq!(params.models[1].shape_key, None);

        assert_eq!(params.lods.len(), 1);
        assert_eq!(params.lods[0].distance, 250.0);
        assert_eq!(params.lods[0].replacements, vec![(String::from("body"), String::from("body_lod1.esm"))]);

        assert_eq!(params.body_groups.len(), 2);
        assert_eq!(params.material_paths, vec!["materials/models/"]);
        assert_eq!(params.motion_packages, vec!["soldier_anims"]);

        // The malformed attachment is skipped, not fatal.
        assert_eq!(params.attachments.len(), 1);
        assert_eq!(params.attachments[0].position, Vector3::new(0.0, 2.0, 0.0));

        assert_eq!(params.ik_chains.len(), 1);
        assert_eq!(params.ik_chains[0].damping, vec![(String::from("r_knee"), 0.5)]);
        assert_eq!(params.ik_chains[0].limits[0].1, Vector3::new(-90.0, 0.0, 0.0));
    }

    #[test]
    fn unparsable_lod_distance_defaults() {
        let script = "modelfilename \"a.gmf\"\nmodel \"a\" \"a.esm\"\nmaterialpath \"m\"\nlod far\n{\n}\n";
        let params = parse_script(script).unwrap();
        assert_eq!(params.lods.len(), 1);
        assert_eq!(params.lods[0].distance, 1.0);
    }

    #[test]
    fn missing_output_name_is_fatal() {
        let error = parse_script("model \"a\" \"a.esm\"\nmaterialpath \"m\"\n").unwrap_err();
        assert!(matches!(error, ScriptError::MissingModelFilename));
    }

    #[test]
    fn zero_model_references_is_fatal() {
        let error = parse_script("modelfilename \"a.gmf\"\nmaterialpath \"m\"\n").unwrap_err();
        assert!(matches!(error, ScriptError::NoModelReferences));
    }

    #[test]
    fn no_material_paths_requires_notextures() {
        let script = "modelfilename \"a.gmf\"\nmodel \"a\" \"a.esm\"\n";
        assert!(matches!(parse_script(script).unwrap_err(), ScriptError::NoMaterialPaths));

        let script = "modelfilename \"a.gmf\"\nmodel \"a\" \"a.esm\"\nnotextures\n";
        let params = parse_script(script).unwrap();
        assert!(params.no_materials);
    }
}

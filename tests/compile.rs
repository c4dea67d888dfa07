use std::path::Path;
use std::process::Command;

const MESH: &str = r#"
bones
{
    bone 0 "root" -1 "" 0 0 0 0 0 0
    bone 1 "spine" 0 "root" 0 0 8 0 0 0
}
group "models/crate"
{
    vertex 0 0 0  0 0 1  0 0  1 0 1.0
    vertex 1 0 0  0 0 1  1 0  1 0 1.0
    vertex 0 1 0  0 0 1  0 1  1 1 1.0
    vertex 1 0 0  0 0 1  1 0  1 0 1.0
    vertex 1 1 0  0 0 1  1 1  1 1 1.0
    vertex 0 1 0  0 0 1  0 1  1 1 1.0
}
"#;

const SCRIPT: &str = r#"
modelfilename "crates/wooden"
model "body" "body.esm"
materialpath "materials/models"
attachment "eyes" "spine" 0 0 4 0 0 0
ikchain "look" "spine"
"#;

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn compile(dir: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_mesh-wrench"))
        .arg(dir.join("crate.txt"))
        .output()
        .expect("failed to launch the compiler")
}

#[test]
fn compiles_a_script_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("crate.txt"), SCRIPT).unwrap();
    std::fs::write(dir.path().join("body.esm"), MESH).unwrap();

    let output = compile(dir.path());
    assert!(output.status.success(), "compiler failed: {}", String::from_utf8_lossy(&output.stderr));

    let bytes = std::fs::read(dir.path().join("crates/wooden.gmf")).unwrap();
    assert_eq!(&bytes[..4], b"GMF1");
    assert_eq!(read_u32(&bytes, 12) as usize, bytes.len());
    assert_eq!(&bytes[16..30], b"crates/wooden\0");
}

#[test]
fn missing_source_mesh_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("crate.txt"), SCRIPT).unwrap();

    let output = compile(dir.path());
    assert!(!output.status.success());
    assert!(!dir.path().join("crates/wooden.gmf").exists());
}

#[test]
fn unbalanced_triangles_fail_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let mut mesh = MESH.to_string();
    mesh = mesh.replacen("    vertex 0 0 0  0 0 1  0 0  1 0 1.0\n", "", 1);

    std::fs::write(dir.path().join("crate.txt"), SCRIPT).unwrap();
    std::fs::write(dir.path().join("body.esm"), mesh).unwrap();

    let output = compile(dir.path());
    assert!(!output.status.success());
}

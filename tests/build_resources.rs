//! Checks on the resources build.rs embeds into the executable.

use std::path::Path;

fn resource(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("resources").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn resource_script_embeds_the_manifest() {
    let script = resource("nicwatch.rc");
    assert!(script.contains("RT_MANIFEST"));
    assert!(script.contains("\"nicwatch.exe.manifest\""));
}

#[test]
fn manifest_requests_administrator_and_declares_supported_os() {
    let manifest = resource("nicwatch.exe.manifest");
    assert!(manifest.contains("level=\"requireAdministrator\""));
    // Windows 10/11 GUID; without it GetVersionExW reports 6.2
    assert!(manifest.contains("{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}"));
}

#[test]
fn build_script_uses_the_embed_resource_2_api() {
    let build = std::fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("build.rs")).unwrap();
    assert!(build.contains("embed_resource::compile(\"resources/nicwatch.rc\", embed_resource::NONE)"));
    assert!(!build.contains("manifest_optional"));
}

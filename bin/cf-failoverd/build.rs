//! ---
//! cf_section: "01-core-functionality"
//! cf_subsection: "binary"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Build script emitting version metadata for the failover daemon."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder()
        .fail_on_error()
        .all_build()
        .all_cargo()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}

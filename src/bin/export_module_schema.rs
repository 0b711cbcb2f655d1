use module_player::module::Module;
use schemars::schema_for;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or("module.schema.json".to_string());
    let schema = schema_for!(Module);
    std::fs::write(path, serde_json::to_string_pretty(&schema)?)?;
    Ok(())
}

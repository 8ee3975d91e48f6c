pub mod competition;
pub mod config;
pub mod harness;
pub mod ramming;
pub mod roster;
pub mod scoring;
pub mod sequence;
pub mod status;
pub mod world;

pub fn version() -> String {
    let mut version = env!("CARGO_PKG_VERSION").to_string();
    if let Some(x) = option_env!("SKIRMISH_ENGINE_SUFFIX") {
        version.push_str(x);
    }
    version
}

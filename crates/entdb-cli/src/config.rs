//! Configuration assembly: defaults baked into `entdb_types::Config`,
//! overridden by an optional TOML file, overridden again by environment
//! variables, exactly as `toka-cli` assembles a `RuntimeConfig` from
//! defaults plus CLI flags (spec.md §6 "Configuration surface").

use entdb_types::Config;

/// Load `entdb_types::Config`, layering (in increasing priority) built-in
/// defaults, an optional config file at `path`, and `ENTDB_*` environment
/// variables.
pub fn load(path: Option<&str>) -> anyhow::Result<Config> {
    let defaults = serde_json::to_string(&Config::default())?;
    let mut builder = config::Config::builder().add_source(config::File::from_str(&defaults, config::FileFormat::Json));

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }

    builder = builder.add_source(config::Environment::with_prefix("ENTDB").separator("__"));

    let assembled = builder.build()?;
    Ok(assembled.try_deserialize()?)
}

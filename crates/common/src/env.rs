use std::{
    env,
    fmt::Debug,
    str::FromStr,
};

/// Read a configuration override from the environment, falling back to
/// `default` when the variable is unset or unparseable. Overrides are logged
/// so a deployment's effective configuration can be reconstructed from its
/// logs.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(_)) => {
            tracing::warn!("Ignoring non-unicode value for {name}; using {default:?}");
            return default;
        },
    };
    match raw.parse::<T>() {
        Ok(value) => {
            tracing::info!("Knob {name} overridden to {value:?} from the environment");
            value
        },
        Err(e) => {
            tracing::warn!(
                "Ignoring unparseable override {name}={raw:?} ({e:?}); using {default:?}"
            );
            default
        },
    }
}

use crate::config::Environment;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
fn default_directives(env: &Environment) -> &'static str {
    match env {
        Environment::Dev => "lv_takeoff=debug,lv_takeoff_backend=debug,tower_http=debug,info",
        Environment::Staging => "lv_takeoff=debug,lv_takeoff_backend=info,tower_http=info,info",
        Environment::Prod => "lv_takeoff=info,lv_takeoff_backend=info,tower_http=warn,warn",
    }
}

/// Installs the global subscriber: pretty output in dev/staging, JSON lines in prod.
pub fn init_logging(env: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(env)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(env.is_dev())
        .with_line_number(env.is_dev());

    let registry = tracing_subscriber::registry().with(filter);
    if env.is_prod() {
        registry.with(fmt_layer.json().flatten_event(true)).init();
    } else {
        registry.with(fmt_layer.pretty()).init();
    }

    tracing::info!(env = ?env, "Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for env in [Environment::Dev, Environment::Staging, Environment::Prod] {
            let directives = default_directives(&env);
            assert!(directives.starts_with("lv_takeoff="));
            assert!(EnvFilter::try_new(directives).is_ok(), "bad filter for {env:?}");
        }
    }
}

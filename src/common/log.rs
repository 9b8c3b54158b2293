use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

const DEFAULT_FILTER: &str = "tradewm=info";

pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let tree = HierarchicalLayer::default()
        .with_writer(std::io::stderr)
        .with_indent_lines(true)
        .with_indent_amount(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    if Registry::default().with(filter).with(tree).try_init().is_err() {
        eprintln!("tradewm: a global tracing subscriber was already installed");
    }
}

/// Runs `f` inside a `trace`-level span named after the operation.
pub fn trace_misc<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let span = tracing::trace_span!("misc", op = name);
    let _guard = span.enter();
    f()
}

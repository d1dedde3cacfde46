use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};
use wtsc_core::{LogControl, LogFormat, WtscError};

type FormatLayer = Box<dyn Layer<Registry> + Send + Sync>;
type FormatHandle = reload::Handle<FormatLayer, Registry>;
type FilterHandle = reload::Handle<EnvFilter, Layered<reload::Layer<FormatLayer, Registry>, Registry>>;

/// Process-wide subscriber whose level and output format can be swapped
/// while running. Logs go to stderr.
pub struct Logger {
    filter: FilterHandle,
    format: FormatHandle,
}

impl Logger {
    /// Install the global subscriber. Fails if one is already installed.
    pub fn init(level: LevelFilter, format: LogFormat) -> anyhow::Result<Self> {
        let (format_layer, format_handle) = reload::Layer::new(format_layer(format));
        let (filter_layer, filter_handle) = reload::Layer::new(env_filter(level));
        tracing_subscriber::registry()
            .with(format_layer)
            .with(filter_layer)
            .try_init()?;
        Ok(Self {
            filter: filter_handle,
            format: format_handle,
        })
    }
}

impl LogControl for Logger {
    fn reconfigure(&self, level: LevelFilter, format: LogFormat) -> wtsc_core::Result<()> {
        self.format
            .reload(format_layer(format))
            .map_err(|e| WtscError::Logger(e.to_string()))?;
        self.filter
            .reload(env_filter(level))
            .map_err(|e| WtscError::Logger(e.to_string()))?;
        Ok(())
    }
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::default().add_directive(level.into())
}

fn format_layer(format: LogFormat) -> FormatLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

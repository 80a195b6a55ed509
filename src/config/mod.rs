mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, JwtConfig, LiveChannelConfig, OtelConfig, PollingConfig,
    ServerConfig, Settings,
};

pub mod config;
pub mod config_loader;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{
    CapValidatorConfig, CorrelationConfig, EngineConfig, LedgerConfig, NotchConfig, SizerConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{ConfigError, RiskError};
pub use traits::{CorrelationFeed, CorrelationSource, MaxLossCalculator};
pub use types::{
    MarketConditions, MarketRegime, StrategySpecification, StructureType, TradeOutcome,
    TradingDay,
};

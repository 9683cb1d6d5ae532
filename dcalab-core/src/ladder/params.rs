//! Ladder parameters and the tagged sizing mode.
//!
//! `LadderConfig` is the plain record read from configuration files, where the
//! order sizes arrive as optional fields. Converting it into `Parameters`
//! selects exactly one `SizingMode`; ambiguous records never reach the
//! calculator.

use serde::{Deserialize, Serialize};

use super::LadderError;

/// Geometry of the ladder: everything except the order sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderShape {
    pub target_profit_percent: f64,
    pub safety_orders_max: u32,
    /// Carried for reporting. The deal machine keeps one live safety order
    /// regardless of this value.
    pub safety_orders_active_max: u32,
    pub safety_order_volume_scale: f64,
    pub safety_order_step_scale: f64,
    pub safety_order_price_deviation_percent: f64,
}

impl LadderShape {
    pub fn validate(&self) -> Result<(), LadderError> {
        require_positive("target_profit_percent", self.target_profit_percent)?;
        require_positive(
            "safety_order_price_deviation_percent",
            self.safety_order_price_deviation_percent,
        )?;
        require_positive("safety_order_step_scale", self.safety_order_step_scale)?;
        require_positive("safety_order_volume_scale", self.safety_order_volume_scale)?;
        Ok(())
    }
}

/// Which currency the order sizes are denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingKind {
    BaseAsset,
    QuoteCurrency,
}

/// Order sizes, tagged by denomination.
///
/// - `ByBaseAsset`: sizes are quantities of the traded asset.
/// - `ByQuoteCurrency`: sizes are amounts of the quote currency; quantities are
///   derived from level prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingMode {
    ByBaseAsset {
        base_order_size: f64,
        safety_order_size: f64,
    },
    ByQuoteCurrency {
        base_order_size: f64,
        safety_order_size: f64,
    },
}

impl SizingMode {
    pub fn new(kind: SizingKind, base_order_size: f64, safety_order_size: f64) -> Self {
        match kind {
            SizingKind::BaseAsset => SizingMode::ByBaseAsset {
                base_order_size,
                safety_order_size,
            },
            SizingKind::QuoteCurrency => SizingMode::ByQuoteCurrency {
                base_order_size,
                safety_order_size,
            },
        }
    }

    pub fn kind(&self) -> SizingKind {
        match self {
            SizingMode::ByBaseAsset { .. } => SizingKind::BaseAsset,
            SizingMode::ByQuoteCurrency { .. } => SizingKind::QuoteCurrency,
        }
    }

    pub fn base_order_size(&self) -> f64 {
        match *self {
            SizingMode::ByBaseAsset {
                base_order_size, ..
            }
            | SizingMode::ByQuoteCurrency {
                base_order_size, ..
            } => base_order_size,
        }
    }

    pub fn safety_order_size(&self) -> f64 {
        match *self {
            SizingMode::ByBaseAsset {
                safety_order_size, ..
            }
            | SizingMode::ByQuoteCurrency {
                safety_order_size, ..
            } => safety_order_size,
        }
    }

    /// Same denomination, different base order size.
    pub fn with_base_order_size(self, base_order_size: f64) -> Self {
        Self::new(self.kind(), base_order_size, self.safety_order_size())
    }

    /// Same denomination, different safety order size.
    pub fn with_safety_order_size(self, safety_order_size: f64) -> Self {
        Self::new(self.kind(), self.base_order_size(), safety_order_size)
    }

    pub fn validate(&self) -> Result<(), LadderError> {
        require_positive("base_order_size", self.base_order_size())?;
        require_positive("safety_order_size", self.safety_order_size())?;
        Ok(())
    }
}

/// Validated ladder parameters. The entry price is supplied separately to
/// [`compute`](super::compute) because a live deal only knows it after the base
/// order fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub shape: LadderShape,
    pub sizing: SizingMode,
}

impl Parameters {
    pub fn new(shape: LadderShape, sizing: SizingMode) -> Result<Self, LadderError> {
        let params = Self { shape, sizing };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), LadderError> {
        self.shape.validate()?;
        self.sizing.validate()
    }

    pub fn with_sizing(&self, sizing: SizingMode) -> Self {
        Self {
            shape: self.shape.clone(),
            sizing,
        }
    }
}

/// Plain configuration record. Exactly one of the two size pairs must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderConfig {
    pub target_profit_percent: f64,
    pub safety_orders_max: u32,
    #[serde(default)]
    pub safety_orders_active_max: Option<u32>,
    pub safety_order_volume_scale: f64,
    pub safety_order_step_scale: f64,
    pub safety_order_price_deviation_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_order_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_order_size: Option<f64>,
    #[serde(default, alias = "base_order_size_usd", skip_serializing_if = "Option::is_none")]
    pub base_order_size_quote: Option<f64>,
    #[serde(default, alias = "safety_order_size_usd", skip_serializing_if = "Option::is_none")]
    pub safety_order_size_quote: Option<f64>,
}

impl LadderConfig {
    fn sizing(&self) -> Result<SizingMode, LadderError> {
        let base_pair = pair("base asset", self.base_order_size, self.safety_order_size)?;
        let quote_pair = pair(
            "quote currency",
            self.base_order_size_quote,
            self.safety_order_size_quote,
        )?;

        match (base_pair, quote_pair) {
            (Some((base, safety)), None) => Ok(SizingMode::ByBaseAsset {
                base_order_size: base,
                safety_order_size: safety,
            }),
            (None, Some((base, safety))) => Ok(SizingMode::ByQuoteCurrency {
                base_order_size: base,
                safety_order_size: safety,
            }),
            (Some(_), Some(_)) => Err(LadderError::InvalidInput(
                "order sizes given in both base asset and quote currency".into(),
            )),
            (None, None) => Err(LadderError::InvalidInput(
                "no order sizes given (set base_order_size/safety_order_size \
                 or base_order_size_quote/safety_order_size_quote)"
                    .into(),
            )),
        }
    }
}

impl TryFrom<LadderConfig> for Parameters {
    type Error = LadderError;

    fn try_from(config: LadderConfig) -> Result<Self, Self::Error> {
        Parameters::try_from(&config)
    }
}

impl TryFrom<&LadderConfig> for Parameters {
    type Error = LadderError;

    fn try_from(config: &LadderConfig) -> Result<Self, Self::Error> {
        let sizing = config.sizing()?;
        let shape = LadderShape {
            target_profit_percent: config.target_profit_percent,
            safety_orders_max: config.safety_orders_max,
            safety_orders_active_max: config
                .safety_orders_active_max
                .unwrap_or(config.safety_orders_max),
            safety_order_volume_scale: config.safety_order_volume_scale,
            safety_order_step_scale: config.safety_order_step_scale,
            safety_order_price_deviation_percent: config.safety_order_price_deviation_percent,
        };
        Parameters::new(shape, sizing)
    }
}

fn pair(
    label: &str,
    base: Option<f64>,
    safety: Option<f64>,
) -> Result<Option<(f64, f64)>, LadderError> {
    match (base, safety) {
        (Some(b), Some(s)) => Ok(Some((b, s))),
        (None, None) => Ok(None),
        _ => Err(LadderError::InvalidInput(format!(
            "{label} sizing needs both base and safety order sizes"
        ))),
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), LadderError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LadderError::InvalidInput(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> LadderConfig {
        LadderConfig {
            target_profit_percent: 1.0,
            safety_orders_max: 7,
            safety_orders_active_max: None,
            safety_order_volume_scale: 2.5,
            safety_order_step_scale: 1.56,
            safety_order_price_deviation_percent: 1.3,
            base_order_size: None,
            safety_order_size: None,
            base_order_size_quote: None,
            safety_order_size_quote: None,
        }
    }

    #[test]
    fn quote_pair_selects_quote_sizing() {
        let config = LadderConfig {
            base_order_size_quote: Some(10.0),
            safety_order_size_quote: Some(10.0),
            ..base_config()
        };
        let params = Parameters::try_from(config).unwrap();
        assert_eq!(params.sizing.kind(), SizingKind::QuoteCurrency);
        assert_eq!(params.shape.safety_orders_active_max, 7);
    }

    #[test]
    fn base_pair_selects_base_sizing() {
        let config = LadderConfig {
            base_order_size: Some(2.0),
            safety_order_size: Some(1.0),
            safety_orders_active_max: Some(3),
            ..base_config()
        };
        let params = Parameters::try_from(config).unwrap();
        assert_eq!(
            params.sizing,
            SizingMode::ByBaseAsset {
                base_order_size: 2.0,
                safety_order_size: 1.0
            }
        );
        assert_eq!(params.shape.safety_orders_active_max, 3);
    }

    #[test]
    fn both_pairs_is_ambiguous() {
        let config = LadderConfig {
            base_order_size: Some(2.0),
            safety_order_size: Some(1.0),
            base_order_size_quote: Some(10.0),
            safety_order_size_quote: Some(10.0),
            ..base_config()
        };
        assert!(matches!(
            Parameters::try_from(config),
            Err(LadderError::InvalidInput(_))
        ));
    }

    #[test]
    fn no_pair_is_rejected() {
        assert!(matches!(
            Parameters::try_from(base_config()),
            Err(LadderError::InvalidInput(_))
        ));
    }

    #[test]
    fn half_pair_is_rejected() {
        let config = LadderConfig {
            base_order_size: Some(2.0),
            ..base_config()
        };
        assert!(matches!(
            Parameters::try_from(config),
            Err(LadderError::InvalidInput(_))
        ));
    }

    #[test]
    fn zero_sizes_are_not_a_mode_selector() {
        // A zero in one pair does not make it "absent".
        let config = LadderConfig {
            base_order_size: Some(0.0),
            safety_order_size: Some(0.0),
            base_order_size_quote: Some(10.0),
            safety_order_size_quote: Some(10.0),
            ..base_config()
        };
        assert!(Parameters::try_from(config).is_err());
    }

    #[test]
    fn non_positive_scales_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = LadderConfig {
                safety_order_step_scale: bad,
                base_order_size: Some(1.0),
                safety_order_size: Some(1.0),
                ..base_config()
            };
            assert!(Parameters::try_from(config).is_err(), "step scale {bad}");
        }
    }

    #[test]
    fn usd_aliases_deserialize() {
        let toml_like = r#"{
            "target_profit_percent": 1.0,
            "safety_orders_max": 7,
            "safety_order_volume_scale": 2.5,
            "safety_order_step_scale": 1.56,
            "safety_order_price_deviation_percent": 1.3,
            "base_order_size_usd": 10.0,
            "safety_order_size_usd": 10.0
        }"#;
        let config: LadderConfig = serde_json::from_str(toml_like).unwrap();
        assert_eq!(config.base_order_size_quote, Some(10.0));
        let params = Parameters::try_from(config).unwrap();
        assert_eq!(params.sizing.kind(), SizingKind::QuoteCurrency);
    }

    #[test]
    fn sizing_mode_rebuilders_keep_kind() {
        let mode = SizingMode::ByQuoteCurrency {
            base_order_size: 10.0,
            safety_order_size: 5.0,
        };
        let resized = mode.with_safety_order_size(9.0).with_base_order_size(11.0);
        assert_eq!(resized.kind(), SizingKind::QuoteCurrency);
        assert_eq!(resized.safety_order_size(), 9.0);
        assert_eq!(resized.base_order_size(), 11.0);
    }
}

// ---------------------------------------------------------------------------
// Actuator channels
// ---------------------------------------------------------------------------

/// One retained value the controller reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Et,
    WateringRatio,
    IrrigationAmount,
    RainBlock,
}

impl Channel {
    fn suffix(self) -> &'static str {
        match self {
            Channel::Et => "et",
            Channel::WateringRatio => "watering_ratio",
            Channel::IrrigationAmount => "irrigation_mm",
            Channel::RainBlock => "rain_block",
        }
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// "<prefix>/<channel>", tolerating a trailing slash on the prefix.
pub(crate) fn topic(prefix: &str, channel: Channel) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), channel.suffix())
}

/// Numeric payloads carry two decimals; non-finite values are refused.
pub(crate) fn amount_payload(value: f64) -> Result<String, String> {
    if value.is_finite() {
        Ok(format!("{value:.2}"))
    } else {
        Err(format!("refusing to publish non-finite value {value}"))
    }
}

/// Rain-block switch state as the controller expects it.
pub(crate) fn switch_payload(on: bool) -> &'static str {
    if on {
        "On"
    } else {
        "Off"
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! Dynamic loss scaling for reduced-precision training.

/// Loss scaler state machine.
///
/// The loss is multiplied by [`scale`](Self::scale) before backward and the
/// gradients divided by it afterwards. A step with non-finite gradients is
/// skipped and the scale backed off; after `growth_interval` consecutive
/// finite steps the scale grows.
#[derive(Debug, Clone, PartialEq)]
pub struct LossScaler {
    enabled: bool,
    scale: f64,
    growth_factor: f64,
    backoff_factor: f64,
    growth_interval: usize,
    growth_tracker: usize,
}

impl LossScaler {
    /// Initial scale when enabled.
    pub const INIT_SCALE: f64 = 65536.0;
    /// Growth multiplier.
    pub const GROWTH_FACTOR: f64 = 2.0;
    /// Backoff multiplier.
    pub const BACKOFF_FACTOR: f64 = 0.5;
    /// Finite steps between growths.
    pub const GROWTH_INTERVAL: usize = 2000;

    /// Scaler with default constants; a disabled scaler keeps scale 1.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            scale: if enabled { Self::INIT_SCALE } else { 1.0 },
            growth_factor: Self::GROWTH_FACTOR,
            backoff_factor: Self::BACKOFF_FACTOR,
            growth_interval: Self::GROWTH_INTERVAL,
            growth_tracker: 0,
        }
    }

    /// Current scale.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Record the outcome of one step.
    pub fn update(&mut self, found_non_finite: bool) {
        if !self.enabled {
            return;
        }
        if found_non_finite {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.growth_tracker = 0;
            }
        }
    }
}

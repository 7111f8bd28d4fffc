use crate::domain::errors::ValidationError;

/// Non-negative, finite base-asset quantity.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        if value < 0.0 {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity must be non-negative, got {}",
                value
            )));
        }
        Ok(Quantity(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// Round down to a multiple of `step`. A non-positive step leaves the value unchanged.
    pub fn floor_to_step(&self, step: f64) -> Quantity {
        if !(step.is_finite() && step > 0.0) {
            return *self;
        }
        // Nudge by a relative epsilon so 0.3 / 0.1 does not floor to 2.
        let steps = (self.0 / step + 1e-9).floor();
        // Snap back onto the step's decimal grid; 7 * 0.1 is 0.7000000000000001
        let factor = 10f64.powi(step_scale(step));
        Quantity(((steps * step * factor).round() / factor).max(0.0))
    }
}

/// Decimal places needed to write `step`, capped at 12.
fn step_scale(step: f64) -> i32 {
    let mut scaled = step;
    for scale in 0..12 {
        if (scaled - scaled.round()).abs() < 1e-9 * scaled.max(1.0) {
            return scale;
        }
        scaled *= 10.0;
    }
    12
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_new_valid() {
        assert_eq!(Quantity::new(100.0).unwrap().value(), 100.0);
    }

    #[test]
    fn test_quantity_new_negative() {
        assert!(matches!(
            Quantity::new(-5.0),
            Err(ValidationError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_quantity_floor_to_step() {
        let qty = Quantity::new(100.0 / 49000.0).unwrap();
        let floored = qty.floor_to_step(0.0001);
        assert!((floored.value() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_quantity_floor_exact_multiple() {
        let qty = Quantity::new(0.3).unwrap();
        assert!((qty.floor_to_step(0.1).value() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_quantity_floor_lands_on_decimal_grid() {
        let qty = Quantity::new(0.75).unwrap();
        assert_eq!(qty.floor_to_step(0.1).value().to_string(), "0.7");
        let qty = Quantity::new(1.23456).unwrap();
        assert_eq!(qty.floor_to_step(0.001).value().to_string(), "1.234");
        let qty = Quantity::new(37.9).unwrap();
        assert_eq!(qty.floor_to_step(5.0).value().to_string(), "35");
    }

    #[test]
    fn test_step_scale() {
        assert_eq!(step_scale(1.0), 0);
        assert_eq!(step_scale(0.1), 1);
        assert_eq!(step_scale(0.0001), 4);
        assert_eq!(step_scale(0.25), 2);
    }

    #[test]
    fn test_quantity_floor_without_step() {
        let qty = Quantity::new(1.23456).unwrap();
        assert_eq!(qty.floor_to_step(0.0).value(), 1.23456);
    }

    #[test]
    fn test_quantity_floor_below_step_is_zero() {
        let qty = Quantity::new(0.00004).unwrap();
        assert!(qty.floor_to_step(0.0001).is_zero());
    }
}
